use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;

use crate::{Executor, Reservation, ReservationType, RunResult, TargetModel};

/// Exit status a reservation-conflict rejection comes back with.
const CONFLICT: i32 = 24;
/// Exit status of the transient busy condition, retried once by callers.
const BUSY: i32 = 6;

#[derive(Debug)]
struct SimState {
    model: TargetModel,
    serial: String,
    busy_next_out: bool,
}

/// An in-process PGR target. Interprets the same command lines the shell
/// executor would hand to the real tools, applies them to a `TargetModel`,
/// and answers in the tools' output grammar, so the whole harness loop can
/// run without hardware.
#[derive(Debug)]
pub struct SimTarget {
    state: Rc<RefCell<SimState>>,
}

impl SimTarget {
    pub fn new<S: AsRef<str>>(serial: S) -> Self {
        SimTarget {
            state: Rc::new(RefCell::new(SimState {
                model: TargetModel::new(),
                serial: serial.as_ref().to_string(),
                busy_next_out: false,
            })),
        }
    }

    /// Executor handle for one initiator. Clones share the target state.
    pub fn executor(&self) -> SimExecutor {
        SimExecutor {
            state: Rc::clone(&self.state),
        }
    }

    /// Make the next out-command fail with the transient busy status.
    pub fn inject_busy(&self) {
        self.state.borrow_mut().busy_next_out = true;
    }

    pub fn registrant_keys(&self) -> Vec<String> {
        self.state.borrow().model.registrant_keys()
    }

    pub fn reservation(&self) -> Option<Reservation> {
        self.state.borrow().model.reservation().cloned()
    }
}

/// `Executor` half of `SimTarget`; one per initiator.
#[derive(Debug, Clone)]
pub struct SimExecutor {
    state: Rc<RefCell<SimState>>,
}

impl Executor for SimExecutor {
    fn run(&self, argv: &[String]) -> Result<RunResult> {
        let (prog, args) = argv.split_first().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command")
        })?;

        let mut state = self.state.borrow_mut();
        let res = match prog.as_str() {
            "sg_persist" => state.sg_persist(args),
            "sg_inq" => state.sg_inq(args),
            "sg_turs" => RunResult::new(Vec::new(), 0),
            "dd" => state.dd(args),
            other => {
                anyhow::bail!(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{}: command not found", other),
                ))
            }
        };
        Ok(res)
    }
}

fn param<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    args.iter().find_map(|a| {
        let mut kv = a.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some(k), Some(v)) if k == key => Some(v),
            _ => None,
        }
    })
}

fn conflict() -> RunResult {
    RunResult::new(
        vec!["persistent reserve out: scsi status: Reservation Conflict".to_string()],
        CONFLICT,
    )
}

impl SimState {
    fn sg_persist(&mut self, args: &[String]) -> RunResult {
        if args.iter().any(|a| a == "-V") {
            return RunResult::new(vec!["sg_persist 0.67".to_string()], 0);
        }

        // device operand is last, the initiator's identity on this target
        let dev = match args.last() {
            Some(dev) => dev.clone(),
            None => return RunResult::new(vec!["sg_persist: no device given".to_string()], 1),
        };

        if args.iter().any(|a| a == "--out") {
            if self.busy_next_out {
                self.busy_next_out = false;
                return RunResult::new(
                    vec!["persistent reserve out: Unit attention".to_string()],
                    BUSY,
                );
            }
            return self.prout(args, &dev);
        }
        if args.iter().any(|a| a == "-k") {
            return self.report_keys();
        }
        if args.iter().any(|a| a == "-r") {
            return self.report_reservation();
        }

        RunResult::new(vec!["sg_persist: invalid usage".to_string()], 1)
    }

    fn prout(&mut self, args: &[String], dev: &str) -> RunResult {
        let rk = param(args, "--param-rk");
        let sark = param(args, "--param-sark");

        if args.iter().any(|a| a == "--register") {
            let res = match (rk, sark) {
                (None, Some(sark)) => self.model.register(dev, sark),
                (Some(rk), Some(sark)) => self.model.register_and_ignore(rk, sark),
                (Some(rk), None) => {
                    if !self.model.is_registered(rk) {
                        return conflict();
                    }
                    self.model.unregister(rk)
                }
                (None, None) => return conflict(),
            };
            return match res {
                Ok(_) => RunResult::new(Vec::new(), 0),
                Err(_) => conflict(),
            };
        }

        let rk = match rk {
            Some(rk) if self.model.is_registered(rk) => rk,
            _ => return conflict(),
        };

        if args.iter().any(|a| a == "--clear") {
            return match self.model.clear(rk) {
                Ok(_) => RunResult::new(Vec::new(), 0),
                Err(_) => conflict(),
            };
        }

        let rtype = param(args, "--prout-type")
            .and_then(|c| c.parse::<u8>().ok())
            .and_then(|c| ReservationType::from_code(c).ok());
        let rtype = match rtype {
            Some(rtype) => rtype,
            None => return RunResult::new(vec!["sg_persist: bad prout type".to_string()], 1),
        };

        let res = if args.iter().any(|a| a == "--reserve") {
            self.model.reserve(rk, rtype)
        } else if args.iter().any(|a| a == "--release") {
            self.model.release(rk, rtype)
        } else {
            return RunResult::new(vec!["sg_persist: invalid usage".to_string()], 1);
        };
        match res {
            Ok(_) => RunResult::new(Vec::new(), 0),
            Err(_) => conflict(),
        }
    }

    fn report_keys(&self) -> RunResult {
        let keys = self.model.registrant_keys();
        if keys.is_empty() {
            return RunResult::new(
                vec!["  there are NO registered reservation keys".to_string()],
                0,
            );
        }

        let mut lines = vec![format!(
            "  PR generation=0x{:x}, {} registered reservation key{} follow:",
            self.model.generation(),
            keys.len(),
            if keys.len() == 1 { "" } else { "s" },
        )];
        for key in keys {
            lines.push(format!("    {}", key));
        }
        RunResult::new(lines, 0)
    }

    fn report_reservation(&self) -> RunResult {
        match self.model.reservation() {
            None => RunResult::new(
                vec![format!(
                    "  PR generation=0x{:x}, there is NO reservation held",
                    self.model.generation(),
                )],
                0,
            ),
            Some(resv) => RunResult::new(
                vec![
                    format!(
                        "  PR generation=0x{:x}, Reservation follows:",
                        self.model.generation(),
                    ),
                    format!("    Key={}", resv.key()),
                    format!("    scope: LU_SCOPE,  type: {}", resv.rtype().wire_name()),
                ],
                0,
            ),
        }
    }

    fn sg_inq(&self, args: &[String]) -> RunResult {
        if args.iter().any(|a| a == "-V") {
            return RunResult::new(vec!["sg_inq 0.97".to_string()], 0);
        }
        RunResult::new(
            vec![
                "standard INQUIRY:".to_string(),
                "  PQual=0  PDT=0  RMB=0  LU_CONG=0  version=0x06".to_string(),
                format!("    Unit serial number: {}", self.serial),
            ],
            0,
        )
    }

    fn dd(&self, args: &[String]) -> RunResult {
        if args.iter().any(|a| a == "--version") {
            return RunResult::new(vec!["dd (coreutils) 9.4".to_string()], 0);
        }

        let src = param(args, "if").unwrap_or("");
        let dst = param(args, "of").unwrap_or("");

        // writing zeros to the device vs reading the device to /dev/null
        let (dev, write) = if src == "/dev/zero" {
            (dst, true)
        } else {
            (src, false)
        };

        let key = self.model.key_of_nexus(dev);
        let allowed = if write {
            self.model.may_write(key)
        } else {
            self.model.may_read(key)
        };
        if allowed {
            RunResult::new(
                vec!["1+0 records in".to_string(), "1+0 records out".to_string()],
                0,
            )
        } else {
            RunResult::new(
                vec![format!(
                    "dd: error {} '{}': Input/output error",
                    if write { "writing" } else { "reading" },
                    dev,
                )],
                1,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Initiator;

    fn init(target: &SimTarget, name: &str, dev: &str, key: Option<&str>) -> Initiator<SimExecutor> {
        Initiator::new(name, dev, key, target.executor())
    }

    #[test]
    fn test_register_and_report_round_trip() -> Result<()> {
        let target = SimTarget::new("beaf11");
        let a = init(&target, "initA", "/dev/sdc", Some("0x123abc"));
        let b = init(&target, "initB", "/dev/sdd", Some("0x696969"));

        assert!(a.register()?.good());
        assert!(b.register()?.good());
        assert_eq!(a.registrants()?, vec!["0x123abc", "0x696969"]);
        Ok(())
    }

    #[test]
    fn test_reservation_report_round_trip() -> Result<()> {
        let target = SimTarget::new("beaf11");
        let a = init(&target, "initA", "/dev/sdc", Some("0x123abc"));

        assert!(a.register()?.good());
        assert!(a.reserve(ReservationType::WriteExclusive)?.good());

        let resv = a.reservation()?.unwrap();
        assert_eq!(resv.key(), "0x123abc");
        assert_eq!(resv.rtype(), ReservationType::WriteExclusive);
        Ok(())
    }

    #[test]
    fn test_duplicate_registration_conflicts() -> Result<()> {
        let target = SimTarget::new("beaf11");
        let a = init(&target, "initA", "/dev/sdc", Some("0x123abc"));

        assert!(a.register()?.good());
        let again = a.with_key("0x1").register()?;
        assert_eq!(again.code(), CONFLICT);
        Ok(())
    }

    #[test]
    fn test_injected_busy_hits_next_out_command_once() -> Result<()> {
        let target = SimTarget::new("beaf11");
        let a = init(&target, "initA", "/dev/sdc", Some("0x123abc"));
        assert!(a.register()?.good());

        target.inject_busy();
        // the proxy retries the busy status once and then succeeds
        assert!(a.unregister()?.good());
        assert!(target.registrant_keys().is_empty());
        Ok(())
    }

    #[test]
    fn test_probes_follow_access_policy() -> Result<()> {
        let target = SimTarget::new("beaf11");
        let a = init(&target, "initA", "/dev/sdc", Some("0x123abc"));
        let b = init(&target, "initB", "/dev/sdd", Some("0x696969"));
        let c = init(&target, "initC", "/dev/sde", None);

        assert!(a.register()?.good());
        assert!(b.register()?.good());
        assert!(a.reserve(ReservationType::WriteExclusive)?.good());

        assert!(a.read_probe()?.good() && a.write_probe()?.good());
        assert!(b.read_probe()?.good() && !b.write_probe()?.good());
        assert!(c.read_probe()?.good() && !c.write_probe()?.good());
        Ok(())
    }

    #[test]
    fn test_serial_is_shared_across_devices() -> Result<()> {
        let target = SimTarget::new("beaf11");
        let a = init(&target, "initA", "/dev/sdc", Some("0x123abc"));
        let c = init(&target, "initC", "/dev/sde", None);

        assert_eq!(a.inquiry_serial()?, c.inquiry_serial()?);
        Ok(())
    }
}
