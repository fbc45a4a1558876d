//! Reservation fixtures, one set per reservation type. The type-specific
//! semantics (holder key sentinel, who may release, what survives an
//! unregistration, who may read or write) all come from the model, so the
//! fixture bodies are shared across the six types.

use anyhow::{anyhow, ensure, Result};

use crate::{Ctx, Executor, Fixture, ReservationType, ALL_REGISTRANTS_KEY};

static TYPES: [ReservationType; 6] = [
    ReservationType::WriteExclusive,
    ReservationType::ExclusiveAccess,
    ReservationType::WriteExclusiveRegistrantsOnly,
    ReservationType::ExclusiveAccessRegistrantsOnly,
    ReservationType::WriteExclusiveAllRegistrants,
    ReservationType::ExclusiveAccessAllRegistrants,
];

pub(super) fn fixtures<E: Executor + Clone + 'static>() -> Vec<Fixture<E>> {
    let mut v: Vec<Fixture<E>> = vec![Fixture::new(
        "reserve/unregistered_rejected",
        unregistered_rejected,
    )];

    for rtype in TYPES {
        let cases: [(&str, fn(&mut Ctx<E>, ReservationType) -> Result<()>); 9] = [
            ("take", take),
            ("read_back", read_back),
            ("contend", contend),
            ("release_by_holder", release_by_holder),
            ("release_by_other", release_by_other),
            ("unregister_holder", unregister_holder),
            ("unregister_other", unregister_other),
            ("unregister_all", unregister_all),
            ("access", access),
        ];
        for (case, run) in cases {
            v.push(Fixture::new(
                format!("reserve/{}/{}", rtype.tag(), case),
                move |ctx: &mut Ctx<E>| run(ctx, rtype),
            ));
        }
    }
    v
}

/// A host that never registered cannot reserve at all.
fn unregistered_rejected<E: Executor + Clone>(ctx: &mut Ctx<E>) -> Result<()> {
    ctx.reset()?;

    let st = ctx.a.reserve(ReservationType::WriteExclusive)?;
    ensure!(!st.good(), "reserve without registration was accepted");
    ensure!(
        ctx.model
            .reserve(ctx.key_a.as_str(), ReservationType::WriteExclusive)
            .is_err(),
        "model accepted a reservation from a non-registrant",
    );
    ctx.verify_state_all()
}

/// Taking the reservation works and is idempotent for the same holder and
/// type.
fn take<E: Executor + Clone>(ctx: &mut Ctx<E>, rtype: ReservationType) -> Result<()> {
    ctx.setup_registered()?;
    ctx.reserve_a(rtype)?;
    ctx.verify_state_all()?;

    // an identical re-reserve changes nothing and is accepted
    ctx.reserve_a(rtype)?;
    ctx.verify_state_all()
}

/// The reservation reads back with the right holder key and type from the
/// reserver, the other registrant, and a never-registered host.
fn read_back<E: Executor + Clone>(ctx: &mut Ctx<E>, rtype: ReservationType) -> Result<()> {
    ctx.setup_registered()?;
    ctx.reserve_a(rtype)?;

    let resv = ctx
        .b
        .reservation()?
        .ok_or_else(|| anyhow!("no reservation reported"))?;
    let want = if rtype.is_all_registrants() {
        ALL_REGISTRANTS_KEY
    } else {
        ctx.key_a.as_str()
    };
    ensure!(
        resv.key() == want,
        "holder key: got {}, want {}",
        resv.key(),
        want,
    );
    ensure!(
        resv.rtype() == rtype,
        "type: got {:?}, want {:?}",
        resv.rtype(),
        rtype,
    );

    ctx.verify_state_all()
}

/// A second registrant contending for the reservation: joining an
/// all-registrants reservation is idempotent, any other combination is a
/// conflict, and a cross-type attempt always conflicts.
fn contend<E: Executor + Clone>(ctx: &mut Ctx<E>, rtype: ReservationType) -> Result<()> {
    ctx.setup_registered()?;
    ctx.reserve_a(rtype)?;

    let st = ctx.b.reserve(rtype)?;
    let accepted = ctx.model.reserve(ctx.key_b.as_str(), rtype).is_ok();
    ensure!(
        st.good() == accepted,
        "same-type reserve by {}: status {}, model accepts: {}",
        ctx.b.name(),
        st,
        accepted,
    );
    ctx.verify_state_all()?;

    let other = if rtype == ReservationType::WriteExclusive {
        ReservationType::ExclusiveAccess
    } else {
        ReservationType::WriteExclusive
    };
    let st = ctx.b.reserve(other)?;
    ensure!(!st.good(), "cross-type reserve was accepted");
    ensure!(
        ctx.model.reserve(ctx.key_b.as_str(), other).is_err(),
        "model accepted a cross-type reserve",
    );
    ctx.verify_state_all()
}

/// The holder releases; the reservation is gone from every vantage point.
fn release_by_holder<E: Executor + Clone>(ctx: &mut Ctx<E>, rtype: ReservationType) -> Result<()> {
    ctx.setup_registered()?;
    ctx.reserve_a(rtype)?;

    let st = ctx.a.release(rtype)?;
    ensure!(st.good(), "release by holder: status {}", st);
    ctx.model.release(ctx.key_a.as_str(), rtype)?;
    ctx.verify_state_all()
}

/// A release from the other registrant: a silent no-op for single-holder
/// types, a real release for all-registrants types, where every
/// registrant is a holder.
fn release_by_other<E: Executor + Clone>(ctx: &mut Ctx<E>, rtype: ReservationType) -> Result<()> {
    ctx.setup_registered()?;
    ctx.reserve_a(rtype)?;

    let st = ctx.b.release(rtype)?;
    ensure!(st.good(), "release by {}: status {}", ctx.b.name(), st);
    ctx.model.release(ctx.key_b.as_str(), rtype)?;
    ctx.verify_state_all()
}

/// Unregistering the holder drops a single-holder reservation with it; an
/// all-registrants reservation stays while any registrant remains.
fn unregister_holder<E: Executor + Clone>(ctx: &mut Ctx<E>, rtype: ReservationType) -> Result<()> {
    ctx.setup_registered()?;
    ctx.reserve_a(rtype)?;

    let st = ctx.a.unregister()?;
    ensure!(st.good(), "unregister {}: status {}", ctx.a.name(), st);
    ctx.model.unregister(ctx.key_a.as_str())?;
    ctx.verify_state_all()
}

/// Unregistering a non-holder never touches the reservation.
fn unregister_other<E: Executor + Clone>(ctx: &mut Ctx<E>, rtype: ReservationType) -> Result<()> {
    ctx.setup_registered()?;
    ctx.reserve_a(rtype)?;

    let st = ctx.b.unregister()?;
    ensure!(st.good(), "unregister {}: status {}", ctx.b.name(), st);
    ctx.model.unregister(ctx.key_b.as_str())?;
    ctx.verify_state_all()
}

/// Once the whole registrant set is gone the reservation is gone too, for
/// every type.
fn unregister_all<E: Executor + Clone>(ctx: &mut Ctx<E>, rtype: ReservationType) -> Result<()> {
    ctx.setup_registered()?;
    ctx.reserve_a(rtype)?;

    let st = ctx.a.unregister()?;
    ensure!(st.good(), "unregister {}: status {}", ctx.a.name(), st);
    ctx.model.unregister(ctx.key_a.as_str())?;
    ctx.verify_state_all()?;

    let st = ctx.b.unregister()?;
    ensure!(st.good(), "unregister {}: status {}", ctx.b.name(), st);
    ctx.model.unregister(ctx.key_b.as_str())?;
    ctx.verify_state_all()
}

/// Read and write probes from the holder, the other registrant, and a
/// never-registered host land exactly as the access policy prescribes.
fn access<E: Executor + Clone>(ctx: &mut Ctx<E>, rtype: ReservationType) -> Result<()> {
    ctx.setup_registered()?;
    ctx.reserve_a(rtype)?;
    ctx.verify_state_all()?;
    ctx.verify_access()
}
