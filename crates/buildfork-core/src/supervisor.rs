//! Process supervisor

use std::sync::Arc;
use tracing::{info, warn};

use buildfork_config::LauncherConfig;
use buildfork_host_api::{
    ChildHandle, HostResult, ProcessHost, ShutdownChannel, ShutdownSignal, SpawnRequest, StdName,
    StdioChannel,
};

use crate::{
    classify, derive_environment, BuildRoutine, CoreError, CoreResult, ForkSession, LaunchMode,
    LaunchRequest, ResizePropagator, ShutdownCoordinator,
};

/// Sent to a child that was spawned but could not be attached (SIGTERM)
const ABANDONED_CHILD_SIGNAL: i32 = 15;

/// Result of a launch
pub enum Launch<H: ProcessHost> {
    /// The build ran in this process
    Inline { exit_code: i32 },
    /// The build runs in a detached child; drive the session to completion
    Forked(ForkSession<H>),
}

/// Launches builds inline or in a detached child
pub struct ProcessSupervisor<H: ProcessHost> {
    host: Arc<H>,
    config: LauncherConfig,
    parent_pid: u32,
    parent_env: Vec<(String, String)>,
}

impl<H: ProcessHost> ProcessSupervisor<H> {
    /// Supervisor for this process, inheriting its environment
    pub fn new(host: Arc<H>, config: LauncherConfig) -> Self {
        let parent_env = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();

        Self {
            host,
            config,
            parent_pid: std::process::id(),
            parent_env,
        }
    }

    pub fn with_parent_env(mut self, env: Vec<(String, String)>) -> Self {
        self.parent_env = env;
        self
    }

    pub fn with_parent_pid(mut self, pid: u32) -> Self {
        self.parent_pid = pid;
        self
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Run `build` inline, or fork `request` into a detached child
    pub async fn launch(
        &self,
        request: &LaunchRequest,
        build: &dyn BuildRoutine,
    ) -> CoreResult<Launch<H>> {
        match classify(&request.flags) {
            LaunchMode::Inline => {
                info!(flags = ?request.flags, "Running build inline");
                let exit_code = build.build(None).await?;
                Ok(Launch::Inline { exit_code })
            }
            LaunchMode::Fork => Ok(Launch::Forked(self.fork(request).await?)),
        }
    }

    /// Spawn the child and wire its channels, coordinator and resize handling
    pub async fn fork(&self, request: &LaunchRequest) -> CoreResult<ForkSession<H>> {
        let host = &self.host;

        // Listeners go in before spawn so no early notice is missed.
        host.watch_parent()?;
        let events = host.subscribe()?;

        let mut channels: Vec<Box<dyn StdioChannel>> = Vec::with_capacity(StdName::ALL.len());
        for stream in StdName::ALL {
            match host.create_output(stream) {
                Ok(channel) => channels.push(channel),
                Err(e) => {
                    destroy_all(&mut channels);
                    return Err(e.into());
                }
            }
        }

        let mut child = match self.spawn(request, &mut channels).await {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %request.command, error = %e, "Failed to spawn child");
                destroy_all(&mut channels);
                return Err(e);
            }
        };

        let attached = attach_all(&mut channels, &mut child)
            .map_err(CoreError::from)
            .and_then(|()| {
                ShutdownCoordinator::connect(host.as_ref(), &mut child, host.event_sender())
            });
        let coordinator = match attached {
            Ok(coordinator) => coordinator,
            Err(e) => {
                warn!(pid = child.pid(), error = %e, "Failed to attach to child");
                destroy_all(&mut channels);
                let termination = ShutdownSignal::TerminationRequest {
                    signal: ABANDONED_CHILD_SIGNAL,
                };
                if let Err(stop_err) = host.signal_channel(child.pid()).send(termination).await {
                    warn!(pid = child.pid(), error = %stop_err, "Failed to stop unattached child");
                }
                return Err(e);
            }
        };
        let resize = host
            .capabilities()
            .posix_signals
            .then(ResizePropagator::new);

        info!(
            pid = child.pid(),
            stdout = ?channels[0].kind(),
            stderr = ?channels[1].kind(),
            "Forked build"
        );

        Ok(ForkSession::new(
            host.clone(),
            child,
            channels,
            coordinator,
            resize,
            events,
        ))
    }

    async fn spawn(
        &self,
        request: &LaunchRequest,
        channels: &mut [Box<dyn StdioChannel>],
    ) -> CoreResult<ChildHandle> {
        let total_memory = self.host.total_memory()?;
        let env = derive_environment(
            self.parent_env.iter().cloned(),
            self.parent_pid,
            total_memory,
            &self.config.env,
            &self.config.heap,
        );

        let mut spawn = SpawnRequest::new(&request.command)
            .args(request.args.iter().cloned())
            .env(env)
            .detached(true)
            .message_port(!self.host.capabilities().posix_signals);
        for channel in channels.iter_mut() {
            spawn = spawn.stdio(channel.stream(), channel.child_stdio()?);
        }

        Ok(self.host.spawn(spawn).await?)
    }
}

fn attach_all(channels: &mut [Box<dyn StdioChannel>], child: &mut ChildHandle) -> HostResult<()> {
    for channel in channels {
        channel.listen(child)?;
        channel.unref();
    }
    Ok(())
}

fn destroy_all(channels: &mut [Box<dyn StdioChannel>]) {
    for channel in channels {
        channel.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompletionCallback, CoordinatorState, CoreError, LaunchFlags, SessionEnd};
    use async_trait::async_trait;
    use buildfork_host_api::{
        ChannelKind, ExitStatus, HostCapabilities, HostError, MockHost, ShutdownSignal,
        MOCK_WINDOW_SIZE,
    };
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;

    const GIB: u64 = 1 << 30;

    #[derive(Default)]
    struct RecordingBuild {
        calls: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl BuildRoutine for RecordingBuild {
        async fn build(&self, on_complete: Option<CompletionCallback>) -> CoreResult<i32> {
            self.calls.lock().unwrap().push(on_complete.is_some());
            Ok(0)
        }
    }

    fn supervisor(host: MockHost) -> ProcessSupervisor<MockHost> {
        ProcessSupervisor::new(Arc::new(host), LauncherConfig::default())
            .with_parent_env(vec![("PATH".into(), "/usr/bin".into())])
            .with_parent_pid(100)
    }

    fn fork_request() -> LaunchRequest {
        LaunchRequest::new("node", ["build.js"], LaunchFlags::default())
    }

    async fn forked(sup: &ProcessSupervisor<MockHost>) -> ForkSession<MockHost> {
        match sup.launch(&fork_request(), &RecordingBuild::default()).await.unwrap() {
            Launch::Forked(session) => session,
            Launch::Inline { .. } => panic!("expected fork"),
        }
    }

    #[tokio::test]
    async fn inline_runs_build_without_callback() {
        let sup = supervisor(MockHost::new());
        let build = RecordingBuild::default();
        let flags = LaunchFlags {
            watch_requested: true,
            ..Default::default()
        };

        let launch = sup
            .launch(&LaunchRequest::new("node", ["build.js"], flags), &build)
            .await
            .unwrap();

        assert!(matches!(launch, Launch::Inline { exit_code: 0 }));
        assert_eq!(*build.calls.lock().unwrap(), vec![false]);
        assert!(sup.host().spawned().is_empty());
    }

    #[tokio::test]
    async fn fork_spawns_detached_child_with_tuned_env() {
        let sup = supervisor(MockHost::new().with_total_memory(16 * GIB));
        let session = forked(&sup).await;

        let spawned = sup.host().spawned();
        assert_eq!(spawned.len(), 1);
        let spawn = &spawned[0];
        assert_eq!(spawn.program, "node");
        assert_eq!(spawn.args, vec!["build.js"]);
        assert!(spawn.detached);
        assert!(!spawn.message_port);

        let env = spawn.env.as_ref().unwrap();
        assert_eq!(env["PPID"], "100");
        assert_eq!(env["PATH"], "/usr/bin");
        assert!(env["NODE_OPTIONS"].contains("--max-old-space-size=12288"));

        assert_eq!(session.channel_kinds(), vec![ChannelKind::Pty, ChannelKind::Pty]);
        assert!(session.resize_propagator().is_some());
        assert!(sup.host().is_watching_parent());
        for stream in StdName::ALL {
            let log = sup.host().channel_log(stream).unwrap();
            assert!(log.listened);
            assert_eq!(log.unrefs, 1);
        }
    }

    #[tokio::test]
    async fn handshake_lets_parent_exit_with_child_alive() {
        let sup = supervisor(MockHost::new());
        let mut session = forked(&sup).await;
        assert_eq!(session.active_handles().count(), 1);

        sup.host().simulate_notice(ShutdownSignal::CompletionNotice);
        let end = session.run().await.unwrap();

        assert_eq!(end, SessionEnd::Detached);
        assert_eq!(end.exit_code(), 0);
        assert_eq!(session.active_handles().count(), 0);
        assert_eq!(session.coordinator_state(), CoordinatorState::Detached);
        assert!(session.child().pid() > 0);
        assert!(sup.host().sent_signals().is_empty());
    }

    #[tokio::test]
    async fn child_crash_destroys_channels_and_keeps_exit_code() {
        let sup = supervisor(MockHost::new().with_output(StdName::Stderr, "boom\n"));
        let mut session = forked(&sup).await;
        let pid = session.child().pid();

        sup.host().simulate_exit(pid, ExitStatus::signaled(9));
        let end = session.run().await.unwrap();

        assert_eq!(end.exit_code(), 137);
        assert_eq!(session.coordinator_state(), CoordinatorState::Closed);
        assert!(sup.host().sent_signals().is_empty());
        for stream in StdName::ALL {
            assert!(sup.host().channel_log(stream).unwrap().destroyed);
        }
        assert_eq!(sup.host().channel_log(StdName::Stderr).unwrap().received, b"boom\n");
    }

    #[tokio::test]
    async fn parent_signal_is_forwarded() {
        let sup = supervisor(MockHost::new());
        let mut session = forked(&sup).await;
        let pid = session.child().pid();

        sup.host().simulate_parent_signal(2);
        let end = session.run().await.unwrap();

        assert_eq!(end.exit_code(), 130);
        assert_eq!(
            sup.host().sent_signals(),
            vec![(pid, ShutdownSignal::TerminationRequest { signal: 2 })]
        );
    }

    #[tokio::test]
    async fn resize_reaches_ptys_and_child() {
        let sup = supervisor(MockHost::new());
        let mut session = forked(&sup).await;
        let pid = session.child().pid();

        sup.host().simulate_resize();
        sup.host().simulate_notice(ShutdownSignal::CompletionNotice);
        session.run().await.unwrap();

        for stream in StdName::ALL {
            assert_eq!(
                sup.host().channel_log(stream).unwrap().resizes,
                vec![MOCK_WINDOW_SIZE]
            );
        }
        assert_eq!(sup.host().sent_signals(), vec![(pid, ShutdownSignal::ResizeNotice)]);
        assert_eq!(session.resize_propagator().unwrap().propagated(), 1);
    }

    #[tokio::test]
    async fn host_without_signals_uses_pipes_and_message_port() {
        let sup = supervisor(MockHost::new().with_capabilities(HostCapabilities::minimal()));
        let mut session = forked(&sup).await;

        assert_eq!(session.channel_kinds(), vec![ChannelKind::Pipe, ChannelKind::Pipe]);
        assert!(session.resize_propagator().is_none());
        assert!(sup.host().spawned()[0].message_port);

        sup.host().simulate_resize();
        let mut port = sup.host().take_child_port().unwrap();
        port.write_all(b"{\"type\":\"completion_notice\"}\n").await.unwrap();

        assert_eq!(session.run().await.unwrap(), SessionEnd::Detached);
        assert!(sup.host().sent_signals().is_empty());
        assert!(sup.host().channel_log(StdName::Stdout).unwrap().resizes.is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_destroys_channels() {
        let host = MockHost::new();
        *host.fail_spawn.lock().unwrap() = true;
        let sup = supervisor(host);

        let result = sup.launch(&fork_request(), &RecordingBuild::default()).await;
        assert!(matches!(
            result,
            Err(CoreError::Host(HostError::SpawnFailed(_)))
        ));
        for stream in StdName::ALL {
            let log = sup.host().channel_log(stream).unwrap();
            assert!(log.destroyed);
            assert!(!log.listened);
        }
    }

    #[tokio::test]
    async fn listen_failure_destroys_channels_and_stops_child() {
        let host = MockHost::new();
        *host.fail_listen.lock().unwrap() = Some(StdName::Stderr);
        let sup = supervisor(host);

        let result = sup.launch(&fork_request(), &RecordingBuild::default()).await;
        assert!(matches!(result, Err(CoreError::Host(HostError::Internal(_)))));

        for stream in StdName::ALL {
            assert!(sup.host().channel_log(stream).unwrap().destroyed);
        }
        assert!(sup.host().channel_log(StdName::Stdout).unwrap().listened);
        assert!(!sup.host().channel_log(StdName::Stderr).unwrap().listened);

        let pid = sup.host().spawned()[0].pid;
        assert_eq!(
            sup.host().sent_signals(),
            vec![(pid, ShutdownSignal::TerminationRequest { signal: 15 })]
        );
    }
}
