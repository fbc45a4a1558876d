//! Registration fixtures: registering, seeing registrations from every
//! vantage point, unregistering, duplicate rejection, and key rotation.

use anyhow::{ensure, Result};

use crate::{Ctx, Executor, Fixture, ReservationType};

pub(super) fn fixtures<E: Executor + Clone + 'static>() -> Vec<Fixture<E>> {
    vec![
        Fixture::new("register/can_register", can_register),
        Fixture::new("register/visibility", visibility),
        Fixture::new("register/unregister", unregister),
        Fixture::new("register/duplicate_rejected", duplicate_rejected),
        Fixture::new("register/rotate_key", rotate_key),
        Fixture::new("clear/wipes_everything", clear_wipes_everything),
        Fixture::new("clear/requires_registration", clear_requires_registration),
    ]
}

fn can_register<E: Executor + Clone>(ctx: &mut Ctx<E>) -> Result<()> {
    ctx.reset()?;

    let st = ctx.a.register()?;
    ensure!(st.good(), "register {}: status {}", ctx.a.name(), st);
    ctx.model.register(ctx.a.name(), ctx.key_a.as_str())?;

    let st = ctx.b.register()?;
    ensure!(st.good(), "register {}: status {}", ctx.b.name(), st);
    ctx.model.register(ctx.b.name(), ctx.key_b.as_str())?;

    ctx.verify_state_all()
}

fn visibility<E: Executor + Clone>(ctx: &mut Ctx<E>) -> Result<()> {
    ctx.reset()?;

    // an empty registrant set reads back as empty, not as an error
    let keys = ctx.a.registrants()?;
    ensure!(keys.is_empty(), "unexpected registrants: {:?}", keys);

    ctx.setup_registered()?;

    // both registrants and a never-registered host see the same ordered
    // set
    ctx.verify_state_all()?;
    let keys = ctx.b.registrants()?;
    ensure!(
        keys == vec![ctx.key_a.clone(), ctx.key_b.clone()],
        "registration order wrong: {:?}",
        keys,
    );
    Ok(())
}

fn unregister<E: Executor + Clone>(ctx: &mut Ctx<E>) -> Result<()> {
    ctx.setup_registered()?;

    let st = ctx.a.unregister()?;
    ensure!(st.good(), "unregister {}: status {}", ctx.a.name(), st);
    ctx.model.unregister(ctx.key_a.as_str())?;
    ctx.verify_state(&ctx.b)?;

    let st = ctx.b.unregister()?;
    ensure!(st.good(), "unregister {}: status {}", ctx.b.name(), st);
    ctx.model.unregister(ctx.key_b.as_str())?;
    ctx.verify_state_all()
}

fn duplicate_rejected<E: Executor + Clone>(ctx: &mut Ctx<E>) -> Result<()> {
    ctx.setup_registered()?;

    // same nexus, substitute key: the target must reject it and leave the
    // registrant set untouched
    let rogue = ctx.a.with_key("0x1");
    let st = rogue.register()?;
    ensure!(!st.good(), "re-registration of {} was accepted", rogue.name());
    ensure!(
        ctx.model.register(rogue.name(), "0x1").is_err(),
        "model accepted a duplicate registration",
    );

    ctx.verify_state_all()
}

fn rotate_key<E: Executor + Clone>(ctx: &mut Ctx<E>) -> Result<()> {
    ctx.setup_registered()?;

    let st = ctx.a.register_and_ignore("0x1")?;
    ensure!(st.good(), "rotate {} to 0x1: status {}", ctx.a.name(), st);
    ctx.model.register_and_ignore(ctx.key_a.as_str(), "0x1")?;
    ctx.verify_state_all()?;

    let keys = ctx.b.registrants()?;
    ensure!(
        keys.first().map(|k| k.as_str()) == Some("0x1"),
        "rotated key not at original position: {:?}",
        keys,
    );

    // rotate back through the new key
    let rotated = ctx.a.with_key("0x1");
    let st = rotated.register_and_ignore(ctx.key_a.as_str())?;
    ensure!(st.good(), "rotate back: status {}", st);
    ctx.model.register_and_ignore("0x1", ctx.key_a.as_str())?;
    ctx.verify_state_all()
}

fn clear_wipes_everything<E: Executor + Clone>(ctx: &mut Ctx<E>) -> Result<()> {
    ctx.setup_registered()?;
    ctx.reserve_a(ReservationType::ExclusiveAccess)?;

    let st = ctx.a.clear()?;
    ensure!(st.good(), "clear by {}: status {}", ctx.a.name(), st);
    ctx.model.clear(ctx.key_a.as_str())?;
    ctx.verify_state_all()
}

fn clear_requires_registration<E: Executor + Clone>(ctx: &mut Ctx<E>) -> Result<()> {
    ctx.reset()?;

    let st = ctx.a.clear()?;
    ensure!(!st.good(), "clear from a non-registrant was accepted");
    ensure!(
        ctx.model.clear(ctx.key_a.as_str()).is_err(),
        "model accepted a clear from a non-registrant",
    );
    ctx.verify_state_all()
}
