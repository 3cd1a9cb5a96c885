//! WireGuard control client
//!
//! Aggregates every backend available on the host behind one interface:
//! - `devices` concatenates all backends' devices in precedence order
//! - `device` and `configure_device` use the first backend owning the name
//! - `close` releases backends in registration order
//!
//! The backend list is fixed at construction and only read afterwards, so a
//! `Client` can be shared between threads without extra locking.

use std::path::PathBuf;

use crate::backend::{
    Backend, BackendFactory, BackendKind, DefaultFactory, HostProbe, OsProbe, DEFAULT_SOCKET_DIR,
};
use crate::error::{Result, WgCtrlError};
use crate::types::{Config, Device};

/// How `Client::close` handles a backend that fails to release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Stop at the first failure; later backends are not closed
    #[default]
    FailFast,
    /// Close every backend and return the first failure
    BestEffort,
}

/// Options for building a client against the real host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Directory holding userspace daemon sockets
    pub socket_dir: PathBuf,
    /// Release behaviour of `Client::close`
    pub release_policy: ReleasePolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
            release_policy: ReleasePolicy::default(),
        }
    }
}

impl ClientOptions {
    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    pub fn release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = policy;
        self
    }
}

/// Per-backend outcome of a name lookup
enum Attempt<T> {
    /// This backend owns the name and the call succeeded
    Found(T),
    /// This backend does not own the name; try the next one
    NotOwned,
    /// Real failure; stop and report it
    Failed(WgCtrlError),
}

impl<T> From<Result<T>> for Attempt<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Found(value),
            Err(e) if e.is_not_found() => Self::NotOwned,
            Err(e) => Self::Failed(e),
        }
    }
}

/// Access to all WireGuard devices on the host
pub struct Client {
    /// Backends in precedence order
    backends: Vec<Box<dyn Backend>>,
    release_policy: ReleasePolicy,
}

impl Client {
    /// Create a client for every backend available on this OS
    pub fn new() -> Result<Self> {
        Self::with_options(ClientOptions::default())
    }

    /// Create a client for this OS with custom options
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        let factory = DefaultFactory::new(options.socket_dir);
        let mut client = Self::with_probe(&OsProbe::current(), &factory)?;
        client.release_policy = options.release_policy;
        Ok(client)
    }

    /// Create a client from an explicit probe and factory
    ///
    /// Families are opened in precedence order whatever order the probe
    /// reports them in. If one fails to open, the backends opened so far are
    /// closed and the open error is returned.
    pub fn with_probe(probe: &dyn HostProbe, factory: &dyn BackendFactory) -> Result<Self> {
        let mut kinds = probe.backend_kinds();
        kinds.sort();
        kinds.dedup();

        let mut backends: Vec<Box<dyn Backend>> = Vec::with_capacity(kinds.len());
        for kind in kinds {
            match factory.open(kind) {
                Ok(backend) => {
                    tracing::debug!("Opened {} backend", kind);
                    backends.push(backend);
                }
                Err(e) => {
                    tracing::debug!("Failed to open {} backend: {}", kind, e);
                    for mut opened in backends {
                        if let Err(close_err) = opened.close() {
                            tracing::warn!(
                                "Failed to close {} backend after aborted setup: {}",
                                opened.kind(),
                                close_err
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self::from_backends(backends))
    }

    /// Create a client over already opened backends, kept in the given order
    pub fn from_backends(backends: Vec<Box<dyn Backend>>) -> Self {
        Self {
            backends,
            release_policy: ReleasePolicy::default(),
        }
    }

    /// Set how `close` handles release failures
    pub fn set_release_policy(&mut self, policy: ReleasePolicy) {
        self.release_policy = policy;
    }

    /// Backend families in the order they are consulted
    pub fn backend_kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// Retrieve all WireGuard devices on this host
    ///
    /// Devices are listed backend by backend in precedence order. Names are
    /// not deduplicated: if two backends report the same interface name both
    /// entries are returned. Any backend failure fails the whole call.
    pub fn devices(&self) -> Result<Vec<Device>> {
        let mut out = Vec::new();
        for backend in &self.backends {
            let devices = backend.devices()?;
            tracing::debug!("{} backend reported {} devices", backend.kind(), devices.len());
            out.extend(devices);
        }
        Ok(out)
    }

    /// Retrieve a WireGuard device by its interface name
    ///
    /// If no backend owns the name, the error satisfies
    /// `WgCtrlError::is_not_found` and converts to an `io::Error` of kind
    /// `NotFound`.
    pub fn device(&self, name: &str) -> Result<Device> {
        self.first_owner(name, |backend| backend.device(name))
    }

    /// Configure a WireGuard device by its interface name
    ///
    /// Only fields set in `config` are applied, by the first backend owning
    /// the name. Not-found is reported as for `device`.
    pub fn configure_device(&self, name: &str, config: &Config) -> Result<()> {
        self.first_owner(name, |backend| backend.configure_device(name, config))
    }

    /// Release all backends
    pub fn close(self) -> Result<()> {
        let mut first_err = None;

        for mut backend in self.backends {
            let kind = backend.kind();
            match backend.close() {
                Ok(()) => tracing::debug!("Closed {} backend", kind),
                Err(e) => {
                    tracing::warn!("Failed to close {} backend: {}", kind, e);
                    if self.release_policy == ReleasePolicy::FailFast {
                        return Err(e);
                    }
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run `op` against each backend until one owns `name`
    fn first_owner<T>(&self, name: &str, op: impl Fn(&dyn Backend) -> Result<T>) -> Result<T> {
        for backend in &self.backends {
            match Attempt::from(op(&**backend)) {
                Attempt::Found(value) => {
                    tracing::debug!("{} found on {} backend", name, backend.kind());
                    return Ok(value);
                }
                Attempt::NotOwned => {
                    tracing::trace!("{} not owned by {} backend", name, backend.kind());
                }
                Attempt::Failed(e) => return Err(e),
            }
        }

        Err(WgCtrlError::not_found(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;
    use std::sync::{Arc, Mutex};

    use crate::error::TransportError;
    use crate::types::DeviceType;

    /// Calls recorded across all fake backends, as "kind:op"
    type CallLog = Arc<Mutex<Vec<String>>>;

    /// What a fake backend does for names it does not own
    #[derive(Clone, Copy)]
    enum Failure {
        None,
        /// Fail every call with a transport error
        Transport,
    }

    struct FakeBackend {
        kind: BackendKind,
        owned: Vec<&'static str>,
        failure: Failure,
        fail_close: bool,
        log: CallLog,
    }

    impl FakeBackend {
        fn new(kind: BackendKind, owned: &[&'static str], log: &CallLog) -> Self {
            Self {
                kind,
                owned: owned.to_vec(),
                failure: Failure::None,
                fail_close: false,
                log: Arc::clone(log),
            }
        }

        fn failing(mut self) -> Self {
            self.failure = Failure::Transport;
            self
        }

        fn failing_close(mut self) -> Self {
            self.fail_close = true;
            self
        }

        fn boxed(self) -> Box<dyn Backend> {
            Box::new(self)
        }

        fn record(&self, op: &str) {
            self.log.lock().unwrap().push(format!("{}:{}", self.kind, op));
        }

        fn check(&self, name: &str) -> Result<()> {
            if let Failure::Transport = self.failure {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied").into());
            }
            if self.owned.contains(&name) {
                Ok(())
            } else {
                Err(WgCtrlError::not_found(name))
            }
        }

        fn make_device(&self, name: &str) -> Device {
            let device_type = match self.kind {
                BackendKind::Kernel => DeviceType::LinuxKernel,
                BackendKind::Userspace => DeviceType::Userspace,
            };
            Device::new(name, device_type)
        }
    }

    impl Backend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn devices(&self) -> Result<Vec<Device>> {
            self.record("devices");
            if let Failure::Transport = self.failure {
                return Err(TransportError::Netlink { errno: 1 }.into());
            }
            Ok(self.owned.iter().map(|n| self.make_device(n)).collect())
        }

        fn device(&self, name: &str) -> Result<Device> {
            self.record("device");
            self.check(name)?;
            Ok(self.make_device(name))
        }

        fn configure_device(&self, name: &str, _config: &Config) -> Result<()> {
            self.record("configure");
            self.check(name)
        }

        fn close(&mut self) -> Result<()> {
            self.record("close");
            if self.fail_close {
                return Err(WgCtrlError::Release {
                    backend: self.kind,
                    source: io::Error::other("close failed"),
                });
            }
            Ok(())
        }
    }

    fn calls(log: &CallLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    /// Kernel owns wg0, userspace owns wg0 and wg1
    fn scenario_client(log: &CallLog) -> Client {
        Client::from_backends(vec![
            FakeBackend::new(BackendKind::Kernel, &["wg0"], log).boxed(),
            FakeBackend::new(BackendKind::Userspace, &["wg0", "wg1"], log).boxed(),
        ])
    }

    #[test]
    fn test_devices_keeps_order_and_duplicates() {
        let log = CallLog::default();
        let client = scenario_client(&log);

        let devices = client.devices().unwrap();
        let listed: Vec<(&str, DeviceType)> = devices
            .iter()
            .map(|d| (d.name.as_str(), d.device_type))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("wg0", DeviceType::LinuxKernel),
                ("wg0", DeviceType::Userspace),
                ("wg1", DeviceType::Userspace),
            ]
        );
        assert_eq!(calls(&log), vec!["kernel:devices", "userspace:devices"]);
    }

    #[test]
    fn test_device_falls_back_after_not_found() {
        let log = CallLog::default();
        let client = scenario_client(&log);

        let device = client.device("wg1").unwrap();
        assert_eq!(device.device_type, DeviceType::Userspace);
        assert_eq!(calls(&log), vec!["kernel:device", "userspace:device"]);
    }

    #[test]
    fn test_device_stops_at_first_owner() {
        let log = CallLog::default();
        let client = scenario_client(&log);

        let device = client.device("wg0").unwrap();
        assert_eq!(device.device_type, DeviceType::LinuxKernel);
        assert_eq!(calls(&log), vec!["kernel:device"]);
    }

    #[test]
    fn test_unknown_device_is_uniform_not_found() {
        let log = CallLog::default();
        let client = scenario_client(&log);

        let err = client.device("wg9").unwrap_err();
        assert!(err.is_not_found());
        let err = client.configure_device("wg9", &Config::default()).unwrap_err();
        assert!(err.is_not_found());

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
        assert_eq!(
            calls(&log),
            vec![
                "kernel:device",
                "userspace:device",
                "kernel:configure",
                "userspace:configure"
            ]
        );
    }

    #[test]
    fn test_configure_uses_first_owner_only() {
        let log = CallLog::default();
        let client = scenario_client(&log);

        let config = Config {
            listen_port: Some(51820),
            ..Config::default()
        };
        client.configure_device("wg0", &config).unwrap();
        assert_eq!(calls(&log), vec!["kernel:configure"]);
    }

    #[test]
    fn test_hard_error_stops_fallback() {
        let log = CallLog::default();
        let client = Client::from_backends(vec![
            FakeBackend::new(BackendKind::Kernel, &[], &log).boxed(),
            FakeBackend::new(BackendKind::Userspace, &[], &log).failing().boxed(),
            FakeBackend::new(BackendKind::Userspace, &["wg0"], &log).boxed(),
        ]);

        let err = client.device("wg0").unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, WgCtrlError::Transport(TransportError::Io(_))));

        let err = client.configure_device("wg0", &Config::default()).unwrap_err();
        assert!(!err.is_not_found());

        // The third backend owns wg0 but is never reached
        assert_eq!(
            calls(&log),
            vec![
                "kernel:device",
                "userspace:device",
                "kernel:configure",
                "userspace:configure"
            ]
        );
    }

    #[test]
    fn test_devices_fails_as_a_whole() {
        let log = CallLog::default();
        let client = Client::from_backends(vec![
            FakeBackend::new(BackendKind::Kernel, &["wg0"], &log).boxed(),
            FakeBackend::new(BackendKind::Userspace, &["wg1"], &log).failing().boxed(),
        ]);

        let err = client.devices().unwrap_err();
        assert!(matches!(
            err,
            WgCtrlError::Transport(TransportError::Netlink { errno: 1 })
        ));
    }

    #[test]
    fn test_devices_stops_at_first_failing_backend() {
        let log = CallLog::default();
        let client = Client::from_backends(vec![
            FakeBackend::new(BackendKind::Kernel, &["wg0"], &log).failing().boxed(),
            FakeBackend::new(BackendKind::Userspace, &["wg1"], &log).boxed(),
        ]);

        let result = client.devices();
        assert!(matches!(
            result,
            Err(WgCtrlError::Transport(TransportError::Netlink { errno: 1 }))
        ));
        assert_eq!(calls(&log), vec!["kernel:devices"]);
    }

    #[test]
    fn test_empty_client() {
        let client = Client::from_backends(Vec::new());
        assert!(client.devices().unwrap().is_empty());
        assert!(client.device("wg0").unwrap_err().is_not_found());
        assert!(client
            .configure_device("wg0", &Config::default())
            .unwrap_err()
            .is_not_found());
        client.close().unwrap();
    }

    #[test]
    fn test_close_in_order() {
        let log = CallLog::default();
        scenario_client(&log).close().unwrap();
        assert_eq!(calls(&log), vec!["kernel:close", "userspace:close"]);
    }

    #[test]
    fn test_close_stops_at_first_error() {
        let log = CallLog::default();
        let client = Client::from_backends(vec![
            FakeBackend::new(BackendKind::Kernel, &[], &log).failing_close().boxed(),
            FakeBackend::new(BackendKind::Userspace, &[], &log).boxed(),
        ]);

        let err = client.close().unwrap_err();
        assert!(matches!(
            err,
            WgCtrlError::Release {
                backend: BackendKind::Kernel,
                ..
            }
        ));
        assert_eq!(calls(&log), vec!["kernel:close"]);
    }

    #[test]
    fn test_best_effort_close_releases_everything() {
        let log = CallLog::default();
        let mut client = Client::from_backends(vec![
            FakeBackend::new(BackendKind::Kernel, &[], &log).failing_close().boxed(),
            FakeBackend::new(BackendKind::Userspace, &[], &log).failing_close().boxed(),
        ]);
        client.set_release_policy(ReleasePolicy::BestEffort);

        let err = client.close().unwrap_err();
        // First failure wins
        assert!(matches!(
            err,
            WgCtrlError::Release {
                backend: BackendKind::Kernel,
                ..
            }
        ));
        assert_eq!(calls(&log), vec!["kernel:close", "userspace:close"]);
    }

    struct FixedProbe(Vec<BackendKind>);

    impl HostProbe for FixedProbe {
        fn backend_kinds(&self) -> Vec<BackendKind> {
            self.0.clone()
        }
    }

    #[test]
    fn test_construction_uses_precedence_order() {
        let log = CallLog::default();
        let factory_log = Arc::clone(&log);
        let factory = move |kind: BackendKind| -> Result<Box<dyn Backend>> {
            Ok(FakeBackend::new(kind, &[], &factory_log).boxed())
        };

        // Probe reports families out of order and twice
        let probe = FixedProbe(vec![
            BackendKind::Userspace,
            BackendKind::Kernel,
            BackendKind::Userspace,
        ]);
        let client = Client::with_probe(&probe, &factory).unwrap();

        assert_eq!(
            client.backend_kinds(),
            vec![BackendKind::Kernel, BackendKind::Userspace]
        );
        // Nothing is enumerated at construction
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn test_construction_failure_closes_opened_backends() {
        let log = CallLog::default();
        let factory_log = Arc::clone(&log);
        let factory = move |kind: BackendKind| -> Result<Box<dyn Backend>> {
            match kind {
                BackendKind::Kernel => Ok(FakeBackend::new(kind, &[], &factory_log)
                    .failing_close()
                    .boxed()),
                BackendKind::Userspace => Err(WgCtrlError::Init {
                    backend: kind,
                    source: io::Error::other("no socket dir"),
                }),
            }
        };

        let probe = FixedProbe(vec![BackendKind::Kernel, BackendKind::Userspace]);
        let err = Client::with_probe(&probe, &factory).err().unwrap();

        // The open error wins over the close error
        assert!(matches!(
            err,
            WgCtrlError::Init {
                backend: BackendKind::Userspace,
                ..
            }
        ));
        assert_eq!(calls(&log), vec!["kernel:close"]);
    }

    #[test]
    fn test_probe_with_no_families() {
        let factory = |kind: BackendKind| -> Result<Box<dyn Backend>> {
            panic!("no backend should be opened, got {}", kind)
        };
        let client = Client::with_probe(&FixedProbe(Vec::new()), &factory).unwrap();
        assert!(client.backend_kinds().is_empty());
        assert!(client.devices().unwrap().is_empty());
    }

    #[test]
    fn test_client_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Client>();
    }
}
