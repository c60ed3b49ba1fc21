//! Process level lifecycle: keeps exactly one plugin instance alive and
//! replaces or tears it down in response to signals.

use error_stack::ResultExt;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tracing::info;
use tracing::warn;

use crate::config::PluginConfig;
use crate::error::PluginError;
use crate::error::PluginResult;
use crate::plugin::DevicePlugin;

/// What the supervisor is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Tear the plugin down and start a fresh instance (SIGHUP)
    Reset,
    /// Tear the plugin down and leave
    Terminate(&'static str),
}

/// Why [`Supervisor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// A terminating signal was received
    Terminated(&'static str),
    /// The signal source went away
    SignalsClosed,
}

/// Forward SIGHUP, SIGINT, SIGTERM and SIGQUIT as [`LifecycleSignal`]s.
///
/// The forwarding task ends once the receiver is dropped.
pub fn listen_for_signals() -> PluginResult<mpsc::Receiver<LifecycleSignal>> {
    fn install(kind: SignalKind, name: &str) -> PluginResult<tokio::signal::unix::Signal> {
        signal(kind).change_context(PluginError::Signal {
            signal: name.to_string(),
        })
    }

    let mut sighup = install(SignalKind::hangup(), "SIGHUP")?;
    let mut sigint = install(SignalKind::interrupt(), "SIGINT")?;
    let mut sigterm = install(SignalKind::terminate(), "SIGTERM")?;
    let mut sigquit = install(SignalKind::quit(), "SIGQUIT")?;

    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = sighup.recv() => LifecycleSignal::Reset,
                _ = sigint.recv() => LifecycleSignal::Terminate("SIGINT"),
                _ = sigterm.recv() => LifecycleSignal::Terminate("SIGTERM"),
                _ = sigquit.recv() => LifecycleSignal::Terminate("SIGQUIT"),
            };
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

/// Owns the single live [`DevicePlugin`] and swaps it on reset.
pub struct Supervisor {
    config: PluginConfig,
}

impl Supervisor {
    pub fn new(config: PluginConfig) -> Self {
        Self { config }
    }

    /// Run the plugin until a terminating signal arrives.
    ///
    /// A failing start or registration, initially or after a reset, ends the
    /// supervisor with that error; nothing is retried.
    pub async fn run(self, mut signals: mpsc::Receiver<LifecycleSignal>) -> PluginResult<Exit> {
        let mut plugin = DevicePlugin::new(self.config.clone());
        plugin.run().await?;

        loop {
            match signals.recv().await {
                Some(LifecycleSignal::Reset) => {
                    info!("received SIGHUP, resetting device plugin");
                    if let Err(e) = plugin.stop().await {
                        warn!("failed to stop device plugin cleanly: {:?}", e);
                    }
                    plugin = DevicePlugin::new(self.config.clone());
                    plugin.run().await?;
                }
                Some(LifecycleSignal::Terminate(name)) => {
                    info!("received {}, stopping device plugin", name);
                    plugin.stop().await?;
                    return Ok(Exit::Terminated(name));
                }
                None => {
                    info!("signal source closed, stopping device plugin");
                    plugin.stop().await?;
                    return Ok(Exit::SignalsClosed);
                }
            }
        }
    }
}
