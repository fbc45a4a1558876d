//! Runs the complete fixture suite against the in-process target, plus
//! the canonical two-initiator exclusive-access walk-through.

use anyhow::Result;
use pgr::{Config, Harness, Initiator, ReservationType, SimExecutor, SimTarget};

static SAMPLE: &str = r#"
initiators:
  - name: initA
    device: /dev/sdc
    key: "0x123abc"
  - name: initB
    device: /dev/sdd
    key: "0x696969"
  - name: initC
    device: /dev/sde
"#;

fn sim_harness() -> Result<(SimTarget, Harness<SimExecutor>)> {
    let target = SimTarget::new("beaf11");
    let cfg = Config::from(SAMPLE)?;
    let harness = Harness::new(cfg, target.executor());
    Ok((target, harness))
}

#[test]
fn preflight_passes_against_the_simulator() -> Result<()> {
    let (_target, harness) = sim_harness()?;
    harness.preflight()
}

#[test]
fn whole_suite_passes() -> Result<()> {
    let (_target, harness) = sim_harness()?;
    harness.preflight()?;

    let report = harness.run(None)?;
    let failures = report
        .results()
        .iter()
        .filter_map(|r| r.failure().map(|f| format!("{}: {}", r.name(), f)))
        .collect::<Vec<String>>();
    assert!(report.all_passed(), "failures:\n{}", failures.join("\n"));
    assert!(report.passed() > 50, "suspiciously small suite");
    Ok(())
}

#[test]
fn name_filter_narrows_the_suite() -> Result<()> {
    let (_target, harness) = sim_harness()?;

    let report = harness.run(Some("reserve/ea/"))?;
    assert!(report.all_passed());
    assert!(report.results().len() < 15);
    assert!(report
        .results()
        .iter()
        .all(|r| r.name().starts_with("reserve/ea/")));
    Ok(())
}

#[test]
fn exclusive_access_walk_through() -> Result<()> {
    let target = SimTarget::new("beaf11");
    let a = Initiator::new("initA", "/dev/sdc", Some("0x123abc"), target.executor());
    let b = Initiator::new("initB", "/dev/sdd", Some("0x696969"), target.executor());

    assert!(a.register()?.good());
    assert!(b.register()?.good());
    assert!(a.reserve(ReservationType::ExclusiveAccess)?.good());

    let resv = b.reservation()?.expect("reservation missing");
    assert_eq!(resv.key(), "0x123abc");
    assert_eq!(resv.rtype(), ReservationType::ExclusiveAccess);

    // only the holder touches the block
    assert!(a.read_probe()?.good());
    assert!(a.write_probe()?.good());
    assert!(!b.read_probe()?.good());
    assert!(!b.write_probe()?.good());

    assert!(a.unregister()?.good());
    assert!(b.reservation()?.is_none());
    Ok(())
}

#[test]
fn injected_busy_is_absorbed_by_the_retry() -> Result<()> {
    let target = SimTarget::new("beaf11");
    let a = Initiator::new("initA", "/dev/sdc", Some("0x123abc"), target.executor());

    assert!(a.register()?.good());
    target.inject_busy();
    assert!(a.unregister()?.good());
    assert!(target.registrant_keys().is_empty());
    Ok(())
}
