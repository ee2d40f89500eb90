//! Terminal viewer entry point: frames, renderer, client and loop wired up.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::animation::{AnimationLoop, AnimationScript};
use crate::client::ViewerClient;
use crate::detect::detect_image_protocol;
use crate::frames::FrameCache;
use crate::render::{ResizeWatcher, TerminalRegion};

const UPDATE_QUEUE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerSettings {
    pub frame_rate: u32,
    pub width: u16,
    pub height: u16,
    pub row_offset: u16,
    pub reconnect_delay: Duration,
    pub keepalive: Duration,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            frame_rate: 8,
            width: 40,
            height: 20,
            row_offset: 0,
            reconnect_delay: Duration::from_secs(2),
            keepalive: Duration::from_secs(30),
        }
    }
}

/// Render the avatar at `ws_url` in this terminal until `shutdown` resolves.
pub async fn run_viewer(
    ws_url: &str,
    settings: &ViewerSettings,
    script: &AnimationScript,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    // All frames are in memory before the first tick
    let frames = FrameCache::load(&script.sources);
    let protocol = detect_image_protocol();
    info!(
        component = "viewer",
        event = "viewer.starting",
        url = %ws_url,
        frame_rate = settings.frame_rate,
        width = settings.width,
        height = settings.height,
        image_protocol = ?protocol,
        "Starting terminal viewer"
    );

    let sink = TerminalRegion::stdout(
        settings.width,
        settings.height,
        settings.row_offset,
        protocol,
    );
    let mut animation = AnimationLoop::new(
        frames,
        script.transitions.clone(),
        sink,
        settings.frame_rate,
    );
    match ResizeWatcher::new() {
        Ok(watcher) => animation = animation.with_resize(watcher),
        Err(e) => warn!(
            component = "viewer",
            event = "viewer.resize.unavailable",
            error = %e,
            "Terminal resize events unavailable"
        ),
    }

    let (tx, rx) = mpsc::channel(UPDATE_QUEUE);
    let client = ViewerClient::spawn(
        ws_url.to_string(),
        settings.reconnect_delay,
        settings.keepalive,
        tx,
    );

    animation.run(rx, Some(client), shutdown).await;
    info!(
        component = "viewer",
        event = "viewer.stopped",
        "Terminal viewer stopped"
    );
    Ok(())
}
