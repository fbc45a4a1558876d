use anyhow::{ensure, Result};
use tracing::{debug, info, warn};

use crate::{
    verify_exists, Config, Executor, Initiator, PgrError, ReservationType, TargetModel,
};

/// Device access needs effective uid 0; checked before anything touches
/// the target.
pub fn require_root() -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        anyhow::bail!(PgrError::NotRoot)
    }
    Ok(())
}

/// Shared state one fixture runs against: the initiator proxies plus the
/// model the target's observable state is checked against after every
/// transition.
pub struct Ctx<E> {
    pub a: Initiator<E>,
    pub b: Initiator<E>,
    pub c: Option<Initiator<E>>,
    pub key_a: String,
    pub key_b: String,
    pub model: TargetModel,
}

impl<E: Executor + Clone> Ctx<E> {
    pub fn new(cfg: &Config, exec: E) -> Self {
        let (a, b) = cfg.keyed();
        let c = cfg.keyless();
        Ctx {
            a: Initiator::new(a.name(), a.device(), a.key(), exec.clone()),
            b: Initiator::new(b.name(), b.device(), b.key(), exec.clone()),
            c: c.map(|c| Initiator::new(c.name(), c.device(), c.key(), exec.clone())),
            key_a: a.key().unwrap_or_default().to_string(),
            key_b: b.key().unwrap_or_default().to_string(),
            model: TargetModel::new(),
        }
    }

    /// Bring the target back to the initial state: no registrants, no
    /// reservation. Every fixture starts here, so no fixture depends on
    /// what ran before it.
    pub fn reset(&mut self) -> Result<()> {
        self.a.tur()?;
        self.b.tur()?;
        if let Some(c) = &self.c {
            c.tur()?;
        }

        self.a.unregister()?;
        self.b.unregister()?;
        if !self.a.registrants()?.is_empty() {
            // keys left behind by something else; reclaim and wipe them
            self.a.register()?;
            self.a.clear()?;
        }

        let left = self.a.registrants()?;
        ensure!(left.is_empty(), "target not clean after reset: {:?}", left);
        ensure!(
            self.a.reservation()?.is_none(),
            "reservation survived reset",
        );

        self.model = TargetModel::new();
        Ok(())
    }

    /// Reset, then register both keyed initiators.
    pub fn setup_registered(&mut self) -> Result<()> {
        self.reset()?;

        let st = self.a.register()?;
        ensure!(st.good(), "setup: register {}: status {}", self.a.name(), st);
        self.model.register(self.a.name(), self.key_a.as_str())?;

        let st = self.b.register()?;
        ensure!(st.good(), "setup: register {}: status {}", self.b.name(), st);
        self.model.register(self.b.name(), self.key_b.as_str())?;

        self.verify_state(&self.a)
    }

    /// Reserve through initiator A and mirror the transition in the model.
    pub fn reserve_a(&mut self, rtype: ReservationType) -> Result<()> {
        let st = self.a.reserve(rtype)?;
        ensure!(
            st.good(),
            "reserve {:?} by {}: status {}",
            rtype,
            self.a.name(),
            st,
        );
        self.model.reserve(self.key_a.as_str(), rtype)?;
        Ok(())
    }

    /// Check that the registrant list and reservation the target reports
    /// through `via` match the model exactly.
    pub fn verify_state(&self, via: &Initiator<E>) -> Result<()> {
        let got = via.registrants()?;
        let want = self.model.registrant_keys();
        ensure!(
            got == want,
            "registrants via {}: got {:?}, want {:?}",
            via.name(),
            got,
            want,
        );

        let got = via.reservation()?;
        let want = self.model.reservation().cloned();
        ensure!(
            got == want,
            "reservation via {}: got {:?}, want {:?}",
            via.name(),
            got,
            want,
        );
        Ok(())
    }

    /// `verify_state` as seen by every configured initiator; reservation
    /// state must look the same no matter who asks.
    pub fn verify_state_all(&self) -> Result<()> {
        self.verify_state(&self.a)?;
        self.verify_state(&self.b)?;
        if let Some(c) = &self.c {
            self.verify_state(c)?;
        }
        Ok(())
    }

    /// Probe read and write access from every initiator and compare each
    /// verdict with the access policy the model prescribes.
    pub fn verify_access(&self) -> Result<()> {
        let mut probes = vec![
            (&self.a, Some(self.key_a.as_str())),
            (&self.b, Some(self.key_b.as_str())),
        ];
        if let Some(c) = &self.c {
            probes.push((c, None));
        }

        for (init, key) in probes {
            let want = self.model.may_read(key);
            let got = init.read_probe()?.good();
            ensure!(
                got == want,
                "read probe from {}: got {}, want {}",
                init.name(),
                got,
                want,
            );

            let want = self.model.may_write(key);
            let got = init.write_probe()?.good();
            ensure!(
                got == want,
                "write probe from {}: got {}, want {}",
                init.name(),
                got,
                want,
            );
        }
        Ok(())
    }
}

/// One named, order-independent test case.
pub struct Fixture<E> {
    name: String,
    run: Box<dyn Fn(&mut Ctx<E>) -> Result<()>>,
}

impl<E> Fixture<E> {
    pub fn new<S, F>(name: S, run: F) -> Self
    where
        S: AsRef<str>,
        F: Fn(&mut Ctx<E>) -> Result<()> + 'static,
    {
        Fixture {
            name: name.as_ref().to_string(),
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self, ctx: &mut Ctx<E>) -> Result<()> {
        (self.run)(ctx)
    }
}

/// Outcome of one fixture.
#[derive(Debug)]
pub struct FixtureResult {
    name: String,
    failure: Option<String>,
}

impl FixtureResult {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

/// Suite outcome, one entry per fixture run.
#[derive(Debug, Default)]
pub struct Report {
    results: Vec<FixtureResult>,
}

impl Report {
    pub fn results(&self) -> &[FixtureResult] {
        &self.results
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    fn push(&mut self, name: &str, failure: Option<String>) {
        self.results.push(FixtureResult {
            name: name.to_string(),
            failure,
        });
    }
}

/// Drives the fixture suite against one target through one executor.
pub struct Harness<E> {
    cfg: Config,
    exec: E,
}

impl<E: Executor + Clone + 'static> Harness<E> {
    pub fn new(cfg: Config, exec: E) -> Self {
        Harness { cfg, exec }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Abort the whole run before any fixture executes unless the tools
    /// exist and every initiator reaches the same logical unit.
    pub fn preflight(&self) -> Result<()> {
        verify_exists(&self.exec, &["sg_persist", "-V"])?;
        verify_exists(&self.exec, &["sg_inq", "-V"])?;
        verify_exists(&self.exec, &["sg_turs", "-V"])?;
        verify_exists(&self.exec, &["dd", "--version"])?;

        let mut expect: Option<String> = None;
        for init in self.cfg.initiators(self.exec.clone()) {
            let serial = init.inquiry_serial()?;
            debug!("{} reports unit serial number {}", init.dev(), serial);
            match &expect {
                None => expect = Some(serial),
                Some(e) if *e == serial => {}
                Some(e) => anyhow::bail!(PgrError::SerialMismatch {
                    dev: init.dev().to_string(),
                    serial,
                    expect: e.clone(),
                }),
            }
        }

        Ok(())
    }

    /// Run every fixture whose name contains `filter` (all of them when
    /// `filter` is `None`). A failing fixture is recorded and the suite
    /// moves on.
    pub fn run(&self, filter: Option<&str>) -> Result<Report> {
        let mut report = Report::default();
        for fixture in crate::scenarios::all::<E>() {
            if let Some(f) = filter {
                if !fixture.name().contains(f) {
                    continue;
                }
            }

            let mut ctx = Ctx::new(&self.cfg, self.exec.clone());
            match fixture.run(&mut ctx) {
                Ok(()) => {
                    info!("PASS {}", fixture.name());
                    report.push(fixture.name(), None);
                }
                Err(e) => {
                    warn!("FAIL {}: {:#}", fixture.name(), e);
                    report.push(fixture.name(), Some(format!("{:#}", e)));
                }
            }
        }
        Ok(report)
    }
}
