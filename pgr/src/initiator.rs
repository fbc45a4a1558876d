use anyhow::Result;
use regex::Regex;
use tracing::debug;

use crate::{Executor, PgrError, PgrStatus, Reservation, ReservationType, RunResult};

static SG_PERSIST: &str = "sg_persist";
static SG_INQ: &str = "sg_inq";
static SG_TURS: &str = "sg_turs";
static DD: &str = "dd";

/// One I_T nexus: a device path to the shared logical unit plus the
/// registration key this initiator registers under. A keyless initiator
/// models a host that never registers.
#[derive(Debug, Clone)]
pub struct Initiator<E> {
    name: String,
    dev: String,
    key: Option<String>,
    exec: E,
}

impl<E: Executor> Initiator<E> {
    pub fn new<S: AsRef<str>>(name: S, dev: S, key: Option<S>, exec: E) -> Self {
        Initiator {
            name: name.as_ref().to_string(),
            dev: dev.as_ref().to_string(),
            key: key.map(|k| k.as_ref().to_string()),
            exec,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dev(&self) -> &str {
        &self.dev
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Same nexus, different key. Used to drive negative registration
    /// paths.
    pub fn with_key<S: AsRef<str>>(&self, key: S) -> Self
    where
        E: Clone,
    {
        Initiator {
            name: self.name.clone(),
            dev: self.dev.clone(),
            key: Some(key.as_ref().to_string()),
            exec: self.exec.clone(),
        }
    }

    fn key_ref(&self) -> Result<&str> {
        self.key
            .as_deref()
            .ok_or_else(|| PgrError::BadConfig(format!("initiator '{}' has no key", self.name)).into())
    }

    fn sg_persist(&self, args: &[String]) -> Result<RunResult> {
        let mut argv = vec![SG_PERSIST.to_string(), "-n".to_string()];
        argv.extend_from_slice(args);
        argv.push(self.dev.clone());
        self.exec.run(&argv)
    }

    /// Register this nexus under its key.
    pub fn register(&self) -> Result<PgrStatus> {
        let args = vec![
            "--out".to_string(),
            "--register".to_string(),
            format!("--param-sark={}", self.key_ref()?),
        ];
        let res = self.sg_persist(&args)?;
        Ok(PgrStatus::new(res.status()))
    }

    /// Replace this nexus's registered key with `new_key`, keeping the
    /// registration (and any reservation held under the old key) alive.
    pub fn register_and_ignore<S: AsRef<str>>(&self, new_key: S) -> Result<PgrStatus> {
        let args = vec![
            "--out".to_string(),
            "--register".to_string(),
            format!("--param-rk={}", self.key_ref()?),
            format!("--param-sark={}", new_key.as_ref()),
        ];
        let res = self.sg_persist(&args)?;
        Ok(PgrStatus::new(res.status()))
    }

    /// Drop this nexus's registration. The target occasionally answers
    /// with the recoverable busy status right after reservation activity;
    /// that exact status is retried once, any second failure stands.
    pub fn unregister(&self) -> Result<PgrStatus> {
        let args = vec![
            "--out".to_string(),
            "--register".to_string(),
            format!("--param-rk={}", self.key_ref()?),
        ];
        let res = self.sg_persist(&args)?;
        let status = PgrStatus::new(res.status());
        if !status.recoverable_busy() {
            return Ok(status);
        }

        debug!("unregister of {} busy, retrying once", self.name);
        let res = self.sg_persist(&args)?;
        Ok(PgrStatus::new(res.status()))
    }

    /// Reserve the logical unit with the supplied type.
    pub fn reserve(&self, rtype: ReservationType) -> Result<PgrStatus> {
        let args = vec![
            "--out".to_string(),
            "--reserve".to_string(),
            format!("--param-rk={}", self.key_ref()?),
            format!("--prout-type={}", rtype.code()),
        ];
        let res = self.sg_persist(&args)?;
        Ok(PgrStatus::new(res.status()))
    }

    /// Release a reservation of the supplied type.
    pub fn release(&self, rtype: ReservationType) -> Result<PgrStatus> {
        let args = vec![
            "--out".to_string(),
            "--release".to_string(),
            format!("--param-rk={}", self.key_ref()?),
            format!("--prout-type={}", rtype.code()),
        ];
        let res = self.sg_persist(&args)?;
        Ok(PgrStatus::new(res.status()))
    }

    /// Drop every registration and any reservation on the target.
    pub fn clear(&self) -> Result<PgrStatus> {
        let args = vec![
            "--out".to_string(),
            "--clear".to_string(),
            format!("--param-rk={}", self.key_ref()?),
        ];
        let res = self.sg_persist(&args)?;
        Ok(PgrStatus::new(res.status()))
    }

    /// Read the ordered list of registered keys.
    pub fn registrants(&self) -> Result<Vec<String>> {
        let res = self.sg_persist(&["-k".to_string()])?;
        if !res.good() {
            anyhow::bail!(PgrError::CommandFailed {
                cmd: format!("{} -k", SG_PERSIST),
                status: res.status(),
            })
        }

        let first = res.lines().first().ok_or_else(|| PgrError::BadResponse {
            cmd: format!("{} -k", SG_PERSIST),
            line: "<empty>".to_string(),
        })?;
        if first.to_lowercase().contains("no registered reservation keys") {
            return Ok(Vec::new());
        }

        let keys = res
            .lines()
            .iter()
            .skip(1)
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .collect::<Vec<String>>();
        debug!("registrants via {}: {:?}", self.name, keys);
        Ok(keys)
    }

    /// Read the current reservation, or `None` when the target reports
    /// none. Anything that fails the response grammar is a hard error.
    pub fn reservation(&self) -> Result<Option<Reservation>> {
        let cmd = format!("{} -r", SG_PERSIST);
        let res = self.sg_persist(&["-r".to_string()])?;
        if !res.good() {
            anyhow::bail!(PgrError::CommandFailed {
                cmd,
                status: res.status(),
            })
        }

        let first = res.lines().first().ok_or_else(|| PgrError::BadResponse {
            cmd: cmd.clone(),
            line: "<empty>".to_string(),
        })?;
        if !first.contains("Reservation follows") {
            debug!("no reservation via {}", self.name);
            return Ok(None);
        }

        let key_line = res.lines().get(1).ok_or_else(|| PgrError::BadResponse {
            cmd: cmd.clone(),
            line: "<missing key line>".to_string(),
        })?;
        let key = key_line
            .split('=')
            .nth(1)
            .ok_or_else(|| PgrError::BadResponse {
                cmd: cmd.clone(),
                line: key_line.clone(),
            })?
            .trim()
            .to_string();

        let type_line = res.lines().get(2).ok_or_else(|| PgrError::BadResponse {
            cmd: cmd.clone(),
            line: "<missing type line>".to_string(),
        })?;
        let re = Regex::new(r"type:\s*(.+?)\s*$")?;
        let name = re
            .captures(type_line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| PgrError::BadResponse {
                cmd,
                line: type_line.clone(),
            })?;
        let rtype = ReservationType::from_wire_name(name)?;

        debug!("reservation via {}: key={} type={:?}", self.name, key, rtype);
        Ok(Some(Reservation::new(&key, rtype)))
    }

    /// Unit serial number from standard INQUIRY data. All initiators must
    /// agree on it before any fixture touches the target.
    pub fn inquiry_serial(&self) -> Result<String> {
        let res = self
            .exec
            .run(&[SG_INQ.to_string(), self.dev.clone()])?;
        if !res.good() {
            anyhow::bail!(PgrError::NoSerial(self.dev.clone()))
        }

        let line = res
            .lines()
            .last()
            .filter(|l| l.contains("Unit serial number"))
            .ok_or_else(|| PgrError::NoSerial(self.dev.clone()))?;
        let serial = line
            .split_whitespace()
            .last()
            .ok_or_else(|| PgrError::NoSerial(self.dev.clone()))?
            .to_string();
        debug!("inquiry_serial({}) -> {}", self.dev, serial);
        Ok(serial)
    }

    /// Send a TEST UNIT READY to soak up any pending unit attention.
    pub fn tur(&self) -> Result<PgrStatus> {
        let res = self
            .exec
            .run(&[SG_TURS.to_string(), self.dev.clone()])?;
        Ok(PgrStatus::new(res.status()))
    }

    /// Try to read one block from the shared logical unit. The exit status
    /// is the access verdict.
    pub fn read_probe(&self) -> Result<PgrStatus> {
        let argv = vec![
            DD.to_string(),
            format!("if={}", self.dev),
            "iflag=direct".to_string(),
            "of=/dev/null".to_string(),
            "skip=1".to_string(),
            "bs=512".to_string(),
            "count=1".to_string(),
        ];
        let res = self.exec.run(&argv)?;
        Ok(PgrStatus::new(res.status()))
    }

    /// Try to write one block to the shared logical unit (destructive to
    /// the second 512-byte block).
    pub fn write_probe(&self) -> Result<PgrStatus> {
        let argv = vec![
            DD.to_string(),
            "if=/dev/zero".to_string(),
            format!("of={}", self.dev),
            "oflag=direct".to_string(),
            "bs=512".to_string(),
            "skip=1".to_string(),
            "seek=1".to_string(),
            "count=1".to_string(),
        ];
        let res = self.exec.run(&argv)?;
        Ok(PgrStatus::new(res.status()))
    }
}

impl<E> Initiator<E> {
    pub fn executor(&self) -> &E {
        &self.exec
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    /// Answers each run() call with the next scripted result.
    struct Script {
        replies: RefCell<Vec<RunResult>>,
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl Script {
        fn new(replies: Vec<RunResult>) -> Self {
            Script {
                replies: RefCell::new(replies),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Executor for &Script {
        fn run(&self, argv: &[String]) -> Result<RunResult> {
            self.calls.borrow_mut().push(argv.to_vec());
            Ok(self.replies.borrow_mut().remove(0))
        }
    }

    fn lines(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_register_command_shape() -> Result<()> {
        let script = Script::new(vec![RunResult::new(Vec::new(), 0)]);
        let init = Initiator::new("initA", "/dev/sdc", Some("0x123abc"), &script);

        let status = init.register()?;
        assert!(status.good());

        let calls = script.calls.borrow();
        assert_eq!(
            calls[0],
            lines(&[
                "sg_persist",
                "-n",
                "--out",
                "--register",
                "--param-sark=0x123abc",
                "/dev/sdc",
            ])
        );
        Ok(())
    }

    #[test]
    fn test_unregister_retries_once_on_busy() -> Result<()> {
        let script = Script::new(vec![
            RunResult::new(lines(&["Unit attention"]), PgrStatus::RECOVERABLE_BUSY),
            RunResult::new(Vec::new(), 0),
        ]);
        let init = Initiator::new("initA", "/dev/sdc", Some("0x123abc"), &script);

        let status = init.unregister()?;
        assert!(status.good());
        assert_eq!(script.calls.borrow().len(), 2);
        Ok(())
    }

    #[test]
    fn test_unregister_does_not_retry_plain_conflict() -> Result<()> {
        let script = Script::new(vec![RunResult::new(Vec::new(), 24)]);
        let init = Initiator::new("initA", "/dev/sdc", Some("0x123abc"), &script);

        let status = init.unregister()?;
        assert_eq!(status.code(), 24);
        assert_eq!(script.calls.borrow().len(), 1);
        Ok(())
    }

    #[test]
    fn test_registrants_empty_set_sentinel() -> Result<()> {
        let script = Script::new(vec![RunResult::new(
            lines(&["  there are NO registered reservation keys"]),
            0,
        )]);
        let init = Initiator::new("initA", "/dev/sdc", Some("0x123abc"), &script);

        assert!(init.registrants()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_registrants_keeps_order() -> Result<()> {
        let script = Script::new(vec![RunResult::new(
            lines(&[
                "  PR generation=0x4, 2 registered reservation keys follow:",
                "    0x123abc",
                "    0x696969",
            ]),
            0,
        )]);
        let init = Initiator::new("initA", "/dev/sdc", Some("0x123abc"), &script);

        assert_eq!(init.registrants()?, vec!["0x123abc", "0x696969"]);
        Ok(())
    }

    #[test]
    fn test_reservation_absent() -> Result<()> {
        let script = Script::new(vec![RunResult::new(
            lines(&["  PR generation=0x4, there is NO reservation held"]),
            0,
        )]);
        let init = Initiator::new("initA", "/dev/sdc", Some("0x123abc"), &script);

        assert!(init.reservation()?.is_none());
        Ok(())
    }

    #[test]
    fn test_reservation_parses_key_and_type() -> Result<()> {
        let script = Script::new(vec![RunResult::new(
            lines(&[
                "  PR generation=0x4, Reservation follows:",
                "    Key=0x123abc",
                "    scope: LU_SCOPE,  type: Exclusive Access, registrants only",
            ]),
            0,
        )]);
        let init = Initiator::new("initA", "/dev/sdc", Some("0x123abc"), &script);

        let resv = init.reservation()?.unwrap();
        assert_eq!(resv.key(), "0x123abc");
        assert_eq!(
            resv.rtype(),
            ReservationType::ExclusiveAccessRegistrantsOnly
        );
        Ok(())
    }

    #[test]
    fn test_unknown_reservation_type_is_loud() {
        let script = Script::new(vec![RunResult::new(
            lines(&[
                "  PR generation=0x4, Reservation follows:",
                "    Key=0x123abc",
                "    scope: LU_SCOPE,  type: Mostly Harmless",
            ]),
            0,
        )]);
        let init = Initiator::new("initA", "/dev/sdc", Some("0x123abc"), &script);

        assert!(init.reservation().is_err());
    }

    #[test]
    fn test_inquiry_serial_takes_last_token() -> Result<()> {
        let script = Script::new(vec![RunResult::new(
            lines(&[
                "standard INQUIRY:",
                "  PQual=0  PDT=0",
                "    Unit serial number: beaf11",
            ]),
            0,
        )]);
        let init = Initiator::new("initA", "/dev/sdc", Some("0x123abc"), &script);

        assert_eq!(init.inquiry_serial()?, "beaf11");
        Ok(())
    }

    #[test]
    fn test_keyless_initiator_cannot_register() {
        let script = Script::new(Vec::new());
        let init = Initiator::new("initC", "/dev/sde", None, &script);

        assert!(init.register().is_err());
    }
}
