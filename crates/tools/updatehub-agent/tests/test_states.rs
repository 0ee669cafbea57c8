use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flume::Receiver;
use updatehub_agent::backends::{
    CopyBackend, CopyOptions, CopyTarget, InstallObject, ProbeResponse,
};
use updatehub_agent::error::{AgentError, BackendError, CopyError};
use updatehub_agent::hub::UPDATE_METADATA_FILE;
use updatehub_agent::metadata::ObjectMetadata;
use updatehub_agent::states::{
    DownloadingState, ErrorState, ExitState, IdleState, InstallingState, PollState, State,
    UpdateHubState, UpdateProbeState,
};

mod common;

use common::Env;

#[test]
fn test_probe_finds_update() {
    let env = Env::new();
    let sha = env.add_object(b"payload");
    let metadata = env.metadata(&[&[&sha]]);
    env.system
        .probe_responses
        .lock()
        .unwrap()
        .push_back(Ok(ProbeResponse {
            metadata: Some(metadata.clone()),
            extra_poll: None,
        }));
    let mut hub = env.hub();
    hub.settings.runtime.polling.retries = 3;
    let transition = Box::new(UpdateProbeState::new()).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::Downloading);
    assert_eq!(
        transition.next.update_metadata().unwrap().package_uid(),
        metadata.package_uid()
    );
    assert_eq!(env.journal().probes, [3]);
    assert_eq!(hub.settings.runtime.polling.retries, 0);
    assert!(hub.settings.runtime.polling.last_poll.is_some());
    // The metadata is kept for crash recovery.
    assert_eq!(
        fs::read(env.download_dir().join(UPDATE_METADATA_FILE)).unwrap(),
        metadata.raw()
    );
    // And the runtime settings are persisted.
    let saved = fs::read_to_string(env.runtime_settings_path()).unwrap();
    assert!(saved.contains("Retries = 0"), "{saved}");
    assert!(saved.contains("LastPoll"), "{saved}");
}

#[test]
fn test_probe_already_installed_update() {
    let env = Env::new();
    let sha = env.add_object(b"payload");
    let metadata = env.metadata(&[&[&sha]]);
    env.system
        .probe_responses
        .lock()
        .unwrap()
        .push_back(Ok(ProbeResponse {
            metadata: Some(metadata.clone()),
            extra_poll: None,
        }));
    let mut hub = env.hub();
    hub.last_installed_package_uid = Some(metadata.package_uid().to_owned());
    let transition = Box::new(UpdateProbeState::new()).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::WaitingForReboot);
}

#[test]
fn test_probe_without_update() {
    let env = Env::new();
    env.system
        .probe_responses
        .lock()
        .unwrap()
        .extend([
            Ok(ProbeResponse::default()),
            Ok(ProbeResponse {
                metadata: None,
                extra_poll: Some(Duration::from_secs(30)),
            }),
        ]);
    let mut hub = env.hub();
    let transition = Box::new(UpdateProbeState::new()).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::Idle);
    let transition = Box::new(UpdateProbeState::new()).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::Poll);
    assert_eq!(
        hub.settings.runtime.polling.extra_interval,
        Some(Duration::from_secs(30))
    );
}

#[test]
fn test_failed_probes_count_retries() {
    let env = Env::new();
    env.system.probe_responses.lock().unwrap().extend([
        Err(BackendError::new("connection refused")),
        Err(BackendError::new("connection refused")),
        Ok(ProbeResponse::default()),
    ]);
    let mut hub = env.hub();
    for expected in [1, 2] {
        let transition = Box::new(UpdateProbeState::new()).handle(&mut hub);
        assert_eq!(transition.next.id(), UpdateHubState::Poll);
        assert_eq!(hub.settings.runtime.polling.retries, expected);
    }
    Box::new(UpdateProbeState::new()).handle(&mut hub);
    assert_eq!(hub.settings.runtime.polling.retries, 0);
    assert_eq!(env.journal().probes, [0, 1, 2]);
}

#[test]
fn test_poll_counts_down_to_probe() {
    let env = Env::new();
    let mut hub = env.hub();
    let transition = Box::new(PollState::new(Duration::from_millis(5))).handle(&mut hub);
    assert!(!transition.cancelled);
    assert_eq!(transition.next.id(), UpdateHubState::UpdateProbe);
}

#[test]
fn test_cancel_before_handle() {
    let env = Env::new();
    let mut hub = env.hub();
    let poll = PollState::new(Duration::from_secs(3600));
    assert!(poll.cancel(true, Box::new(UpdateProbeState::new())));
    let transition = Box::new(poll).handle(&mut hub);
    assert!(transition.cancelled);
    assert_eq!(transition.next.id(), UpdateHubState::UpdateProbe);
}

#[test]
fn test_idle_with_polling_disabled_waits_for_cancel() {
    let env = Env::new();
    let mut settings = env.settings();
    settings.polling.enabled = false;
    let mut hub = env.hub_with(env.backends(), settings);
    let idle = IdleState::new();
    let slot = idle.cancel_slot().unwrap().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        slot.cancel(true, Box::new(ExitState::new(0)))
    });
    let transition = Box::new(idle).handle(&mut hub);
    assert!(canceller.join().unwrap());
    assert!(transition.cancelled);
    assert_eq!(transition.next.id(), UpdateHubState::Exit);
}

#[test]
fn test_download_reports_progress_up_to_100() {
    let env = Env::new();
    let first = env.add_object(b"first object");
    let second = env.add_object(b"second object");
    let metadata = env.metadata(&[&[&first, &second]]);
    let mut hub = env.hub();
    let downloading = DownloadingState::new(metadata);
    let progress = downloading.progress_tracker();
    let transition = Box::new(downloading).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::Downloaded);
    assert_eq!(progress.get(), 100);
    assert_eq!(
        fs::read(env.download_dir().join(&first)).unwrap(),
        b"first object"
    );
}

#[test]
fn test_download_skips_downloaded_objects() {
    let env = Env::new();
    let sha = env.add_object(b"payload");
    fs::create_dir_all(env.download_dir()).unwrap();
    fs::write(env.download_dir().join(&sha), b"payload").unwrap();
    let mut hub = env.hub();
    let transition = Box::new(DownloadingState::new(env.metadata(&[&[&sha]]))).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::Downloaded);
    assert!(env.journal().downloads.is_empty());
}

#[test]
fn test_download_retries_timeouts() {
    let env = Env::new();
    let sha = env.add_object(b"payload");
    env.system
        .download_failures
        .lock()
        .unwrap()
        .extend([BackendError::timeout("slow"), BackendError::timeout("slow")]);
    let mut hub = env.hub();
    let transition = Box::new(DownloadingState::new(env.metadata(&[&[&sha]]))).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::Downloaded);
    assert_eq!(env.journal().downloads.len(), 3);
}

#[test]
fn test_download_failure_is_transient_error() {
    let env = Env::new();
    let sha = env.add_object(b"payload");
    env.system
        .download_failures
        .lock()
        .unwrap()
        .push_back(BackendError::new("forbidden"));
    let mut hub = env.hub();
    let transition = Box::new(DownloadingState::new(env.metadata(&[&[&sha]]))).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::Error);
    let error = transition.next.error().unwrap();
    assert!(!error.is_fatal());
    assert!(error.message().contains("forbidden"), "{}", error.message());
}

/// Copy which only finishes once cancelled.
struct BlockingCopy;

impl CopyBackend for BlockingCopy {
    fn copy(
        &self,
        _: &mut dyn CopyTarget,
        _: &mut dyn Read,
        _: &CopyOptions,
        cancel: &Receiver<()>,
    ) -> Result<bool, CopyError> {
        match cancel.recv_timeout(Duration::from_secs(10)) {
            Ok(()) => Ok(true),
            Err(_) => Err(CopyError::Timeout(Duration::from_secs(10))),
        }
    }
}

#[test]
fn test_cancel_download_in_progress() {
    let env = Env::new();
    let sha = env.add_object(b"payload");
    let mut hub = env.hub_with(env.backends_with_copy(Arc::new(BlockingCopy)), env.settings());
    let downloading = DownloadingState::new(env.metadata(&[&[&sha]]));
    let slot = downloading.cancel_slot().unwrap().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        slot.cancel(true, Box::new(ExitState::new(0)))
    });
    let transition = Box::new(downloading).handle(&mut hub);
    canceller.join().unwrap();
    assert!(transition.cancelled);
    assert_eq!(transition.next.id(), UpdateHubState::Exit);
}

#[test]
fn test_download_retry_waits_for_cancel() {
    let env = Env::new();
    let sha = env.add_object(b"payload");
    env.system
        .download_failures
        .lock()
        .unwrap()
        .push_back(BackendError::timeout("slow"));
    let mut hub = env.hub();
    hub.download_retry_base = Duration::from_secs(3600);
    let downloading = DownloadingState::new(env.metadata(&[&[&sha]]));
    let slot = downloading.cancel_slot().unwrap().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        slot.cancel(true, Box::new(IdleState::new()))
    });
    let transition = Box::new(downloading).handle(&mut hub);
    assert!(canceller.join().unwrap());
    assert!(transition.cancelled);
    assert_eq!(transition.next.id(), UpdateHubState::Idle);
    assert_eq!(env.journal().downloads.len(), 1);
}

#[test]
fn test_install_reports_progress_up_to_100() {
    let env = Env::new();
    let first = env.add_object(b"first object");
    let second = env.add_object(b"second object");
    fs::create_dir_all(env.download_dir()).unwrap();
    fs::write(env.download_dir().join(&first), b"first object").unwrap();
    fs::write(env.download_dir().join(&second), b"second object").unwrap();
    let mut hub = env.hub();
    let installing = InstallingState::new(env.metadata(&[&[&first, &second]]));
    let progress = installing.progress_tracker();
    let transition = Box::new(installing).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::Installed);
    assert_eq!(progress.get(), 100);
    assert_eq!(fs::read(env.target(0, 1)).unwrap(), b"second object");
}

/// Object taking a while to install.
struct SlowObject(ObjectMetadata);

impl InstallObject for SlowObject {
    fn metadata(&self) -> &ObjectMetadata {
        &self.0
    }

    fn setup(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn install(&mut self, _: &Path) -> Result<(), BackendError> {
        thread::sleep(Duration::from_millis(200));
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[test]
fn test_cancel_during_install_keeps_installation() {
    let env = Env::new();
    *env.system.active.lock().unwrap() = 1;
    let slot_a = env.add_object(b"slot a");
    let slot_b = env.add_object(b"slot b");
    fs::create_dir_all(env.download_dir()).unwrap();
    fs::write(env.download_dir().join(&slot_a), b"slot a").unwrap();
    fs::write(env.download_dir().join(&slot_b), b"slot b").unwrap();
    let metadata = env.metadata_with_mode(&[&[&slot_a], &[&slot_b]], "slow");
    let mut hub = env.hub();
    hub.modes.register("slow", |object| {
        Ok(Box::new(SlowObject(object.clone())) as Box<dyn InstallObject>)
    });
    let installing = InstallingState::new(metadata.clone());
    let slot = installing.cancel_slot().unwrap().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        slot.cancel(true, Box::new(UpdateProbeState::new()))
    });
    let transition = Box::new(installing).handle(&mut hub);
    assert!(canceller.join().unwrap());
    assert!(transition.cancelled);
    assert_eq!(transition.next.id(), UpdateHubState::UpdateProbe);
    assert_eq!(env.journal().set_active, [0]);
    assert_eq!(
        hub.last_installed_package_uid.as_deref(),
        Some(metadata.package_uid())
    );
    // Probing the same package again must not install it a second time.
    env.system
        .probe_responses
        .lock()
        .unwrap()
        .push_back(Ok(ProbeResponse {
            metadata: Some(metadata),
            extra_poll: None,
        }));
    let transition = transition.next.handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::WaitingForReboot);
}

#[test]
fn test_install_is_idempotent() {
    let env = Env::new();
    let sha = env.add_object(b"payload");
    let metadata = env.metadata(&[&[&sha]]);
    let mut hub = env.hub();
    hub.last_installed_package_uid = Some(metadata.package_uid().to_owned());
    let transition = Box::new(InstallingState::new(metadata)).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::Idle);
    assert!(!env.target(0, 0).exists());
}

#[test]
fn test_install_missing_object_is_transient_error() {
    let env = Env::new();
    let sha = env.add_object(b"payload");
    let mut hub = env.hub();
    let transition = Box::new(InstallingState::new(env.metadata(&[&[&sha]]))).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::Error);
    assert!(!transition.next.error().unwrap().is_fatal());
}

#[test]
fn test_transient_error_returns_to_idle() {
    let env = Env::new();
    let mut hub = env.hub();
    let transition =
        Box::new(ErrorState::new(AgentError::transient("oops"), None)).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::Idle);
}

#[test]
fn test_fatal_error_exits() {
    let env = Env::new();
    let mut hub = env.hub();
    let transition = Box::new(ErrorState::new(AgentError::fatal("oops"), None)).handle(&mut hub);
    assert_eq!(transition.next.id(), UpdateHubState::Exit);
    assert_eq!(transition.next.exit_code(), Some(1));
}

#[test]
#[should_panic]
fn test_exit_must_not_be_handled() {
    let env = Env::new();
    let mut hub = env.hub();
    Box::new(ExitState::new(0)).handle(&mut hub);
}
