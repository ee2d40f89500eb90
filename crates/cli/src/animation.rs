//! The terminal animation loop.
//!
//! One task owns the current state, the frame index and both timers: the
//! fixed-period render interval and at most one pending auto-transition.
//! State changes arrive as `ServerMessage`s from the viewer client.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use agent_avatar_protocol::{AvatarState, ServerMessage};

use crate::client::ViewerClient;
use crate::frames::{FrameCache, FrameSource, StateFrames};
use crate::render::{Frame, FrameContent, FrameSink, ResizeWatcher};

/// Leave `state` for `to` once `after` has elapsed without another change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoTransition {
    pub after: Duration,
    pub to: AvatarState,
}

/// Everything the loop needs from an avatar manifest.
#[derive(Debug, Clone, Default)]
pub struct AnimationScript {
    pub sources: HashMap<AvatarState, FrameSource>,
    pub transitions: HashMap<AvatarState, AutoTransition>,
}

/// Snapshot published after every change the loop makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationStatus {
    pub state: AvatarState,
    pub frame_index: usize,
    pub pending_transition: Option<AvatarState>,
}

struct PendingTransition {
    to: AvatarState,
    sleep: Pin<Box<Sleep>>,
}

enum Event {
    Tick,
    Update(ServerMessage),
    UpdatesClosed,
    Transition(AvatarState),
    Resized,
    ResizeStopped,
    Shutdown,
}

pub struct AnimationLoop<S: FrameSink> {
    frames: FrameCache,
    transitions: HashMap<AvatarState, AutoTransition>,
    sink: S,
    period: Duration,
    current: AvatarState,
    frame_index: usize,
    pending: Option<PendingTransition>,
    resize: Option<ResizeWatcher>,
    status_tx: watch::Sender<AnimationStatus>,
}

impl<S: FrameSink> AnimationLoop<S> {
    pub fn new(
        frames: FrameCache,
        transitions: HashMap<AvatarState, AutoTransition>,
        sink: S,
        frame_rate: u32,
    ) -> Self {
        let current = AvatarState::Idle;
        let (status_tx, _) = watch::channel(AnimationStatus {
            state: current.clone(),
            frame_index: 0,
            pending_transition: None,
        });
        Self {
            frames,
            transitions,
            sink,
            period: Duration::from_secs(1) / frame_rate.max(1),
            current,
            frame_index: 0,
            pending: None,
            resize: None,
            status_tx,
        }
    }

    pub fn with_resize(mut self, watcher: ResizeWatcher) -> Self {
        self.resize = Some(watcher);
        self
    }

    pub fn status(&self) -> watch::Receiver<AnimationStatus> {
        self.status_tx.subscribe()
    }

    /// Run until `shutdown` resolves. Returns the sink after it is restored.
    pub async fn run(
        mut self,
        mut updates: mpsc::Receiver<ServerMessage>,
        client: Option<ViewerClient>,
        shutdown: impl Future<Output = ()>,
    ) -> S {
        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        let mut updates_open = true;

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => Event::Shutdown,
                _ = ticker.tick() => Event::Tick,
                to = wait_pending(&mut self.pending) => Event::Transition(to),
                msg = updates.recv(), if updates_open => match msg {
                    Some(msg) => Event::Update(msg),
                    None => Event::UpdatesClosed,
                },
                resized = next_resize(&mut self.resize) => match resized {
                    Some(()) => Event::Resized,
                    None => Event::ResizeStopped,
                },
            };

            match event {
                Event::Shutdown => break,
                Event::Tick => self.tick(),
                Event::Update(msg) => {
                    if let Some(record) = msg.record() {
                        if record.state != self.current {
                            self.enter(record.state);
                        }
                    }
                }
                Event::UpdatesClosed => {
                    debug!(
                        component = "animation",
                        event = "animation.updates.closed",
                        "Update channel closed, holding last state"
                    );
                    updates_open = false;
                }
                Event::Transition(to) => {
                    self.pending = None;
                    info!(
                        component = "animation",
                        event = "animation.transition.fired",
                        from = %self.current,
                        to = %to,
                        "Auto-transition"
                    );
                    self.enter(to);
                }
                Event::Resized => {
                    if let Err(e) = self.sink.resized() {
                        warn!(
                            component = "animation",
                            event = "animation.resize.failed",
                            error = %e,
                            "Failed to handle terminal resize"
                        );
                    }
                }
                Event::ResizeStopped => self.resize = None,
            }
        }

        drop(ticker);
        self.pending = None;
        // A client parked on a full queue must see the receiver go away
        drop(updates);
        if let Some(client) = client {
            client.close().await;
        }
        self.resize = None;
        if let Err(e) = self.sink.restore() {
            warn!(
                component = "animation",
                event = "animation.restore.failed",
                error = %e,
                "Failed to restore terminal"
            );
        }
        self.sink
    }

    /// Switch to `state`, restart its animation and arm its transition.
    fn enter(&mut self, state: AvatarState) {
        debug!(
            component = "animation",
            event = "animation.state.changed",
            from = %self.current,
            to = %state,
            "Animation state changed"
        );
        self.pending = self.transitions.get(&state).map(|t| PendingTransition {
            to: t.to.clone(),
            sleep: Box::pin(time::sleep(t.after)),
        });
        self.current = state;
        self.frame_index = 0;
        self.publish();
    }

    /// Draw the frame at `frame_index`, then advance it.
    fn tick(&mut self) {
        let frames = self.frames.frames_for(&self.current);
        let len = frames.map(|f| f.len()).unwrap_or(0).max(1);
        let index = self.frame_index % len;

        let content = match frames.map(|f| &**f) {
            Some(StateFrames::Text(texts)) => texts
                .get(index)
                .map(|t| FrameContent::Text(t.as_str()))
                .unwrap_or(FrameContent::Placeholder),
            Some(StateFrames::Image { path, encoded }) => FrameContent::Image {
                path: path.as_path(),
                encoded: encoded.as_str(),
            },
            None => FrameContent::Placeholder,
        };
        let frame = Frame {
            state: &self.current,
            index,
            content,
        };
        if let Err(e) = self.sink.draw(&frame) {
            debug!(
                component = "animation",
                event = "animation.draw.failed",
                error = %e,
                "Failed to draw frame"
            );
        }

        self.frame_index = (index + 1) % len;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(AnimationStatus {
            state: self.current.clone(),
            frame_index: self.frame_index,
            pending_transition: self.pending.as_ref().map(|p| p.to.clone()),
        });
    }
}

async fn wait_pending(pending: &mut Option<PendingTransition>) -> AvatarState {
    match pending {
        Some(p) => {
            p.sleep.as_mut().await;
            p.to.clone()
        }
        None => std::future::pending().await,
    }
}

async fn next_resize(watcher: &mut Option<ResizeWatcher>) -> Option<()> {
    match watcher {
        Some(w) => w.changed().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    use agent_avatar_protocol::StateRecord;
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Drawn {
        state: AvatarState,
        index: usize,
        text: Option<String>,
    }

    #[derive(Default, Clone)]
    struct RecordingSink {
        drawn: Arc<Mutex<Vec<Drawn>>>,
        restored: Arc<Mutex<bool>>,
    }

    impl FrameSink for RecordingSink {
        fn draw(&mut self, frame: &Frame<'_>) -> io::Result<()> {
            let text = match frame.content {
                FrameContent::Text(t) => Some(t.to_string()),
                _ => None,
            };
            self.drawn.lock().unwrap().push(Drawn {
                state: frame.state.clone(),
                index: frame.index,
                text,
            });
            Ok(())
        }

        fn resized(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn restore(&mut self) -> io::Result<()> {
            *self.restored.lock().unwrap() = true;
            Ok(())
        }
    }

    fn inline(frames: &[&str]) -> FrameSource {
        FrameSource::Inline(frames.iter().map(|f| f.to_string()).collect())
    }

    fn script() -> AnimationScript {
        AnimationScript {
            sources: HashMap::from([
                (AvatarState::Idle, inline(&["i0", "i1", "i2"])),
                (AvatarState::Success, inline(&["s0", "s1"])),
                (AvatarState::Thinking, inline(&["t0", "t1"])),
            ]),
            transitions: HashMap::from([(
                AvatarState::Success,
                AutoTransition {
                    after: Duration::from_millis(2000),
                    to: AvatarState::Idle,
                },
            )]),
        }
    }

    struct Harness {
        updates: mpsc::Sender<ServerMessage>,
        status: watch::Receiver<AnimationStatus>,
        stop: oneshot::Sender<()>,
        task: tokio::task::JoinHandle<RecordingSink>,
    }

    fn start(frame_rate: u32) -> Harness {
        let script = script();
        let animation = AnimationLoop::new(
            FrameCache::load(&script.sources),
            script.transitions,
            RecordingSink::default(),
            frame_rate,
        );
        let status = animation.status();
        let (updates, rx) = mpsc::channel(8);
        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(animation.run(rx, None, async move {
            let _ = stop_rx.await;
        }));
        Harness {
            updates,
            status,
            stop,
            task,
        }
    }

    fn welcome(state: AvatarState) -> ServerMessage {
        ServerMessage::welcome(&StateRecord::new(state, 1))
    }

    fn state(state: AvatarState) -> ServerMessage {
        ServerMessage::state(&StateRecord::new(state, 2))
    }

    async fn sleep_ms(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_state_returns_to_idle_after_duration() {
        let h = start(3);
        h.updates.send(welcome(AvatarState::Success)).await.unwrap();

        sleep_ms(1999).await;
        assert_eq!(h.status.borrow().state, AvatarState::Success);
        assert_eq!(
            h.status.borrow().pending_transition,
            Some(AvatarState::Idle)
        );

        sleep_ms(2).await;
        let status = h.status.borrow().clone();
        assert_eq!(status.state, AvatarState::Idle);
        assert_eq!(status.pending_transition, None);

        // Next tick lands at ~2333ms and must start idle from its first frame
        sleep_ms(400).await;
        h.stop.send(()).unwrap();
        let sink = h.task.await.unwrap();
        let drawn = sink.drawn.lock().unwrap();
        let first_idle = drawn
            .iter()
            .skip_while(|d| d.state != AvatarState::Success)
            .find(|d| d.state == AvatarState::Idle)
            .unwrap();
        assert_eq!(first_idle.index, 0);
        assert_eq!(first_idle.text.as_deref(), Some("i0"));
    }

    #[tokio::test(start_paused = true)]
    async fn new_state_cancels_pending_transition() {
        let h = start(3);
        h.updates.send(state(AvatarState::Success)).await.unwrap();
        sleep_ms(1000).await;
        h.updates.send(state(AvatarState::Thinking)).await.unwrap();

        sleep_ms(1500).await;
        let status = h.status.borrow().clone();
        assert_eq!(status.state, AvatarState::Thinking);
        assert_eq!(status.pending_transition, None);

        h.stop.send(()).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn frames_loop_and_reset_on_state_change() {
        let h = start(10);
        sleep_ms(450).await;
        h.updates.send(state(AvatarState::Thinking)).await.unwrap();
        sleep_ms(200).await;

        h.stop.send(()).unwrap();
        let sink = h.task.await.unwrap();
        let drawn = sink.drawn.lock().unwrap().clone();

        let idle: Vec<usize> = drawn
            .iter()
            .filter(|d| d.state == AvatarState::Idle)
            .map(|d| d.index)
            .collect();
        assert_eq!(idle, vec![0, 1, 2, 0, 1]);

        let thinking: Vec<&Drawn> = drawn
            .iter()
            .filter(|d| d.state == AvatarState::Thinking)
            .collect();
        assert_eq!(thinking[0].index, 0);
        assert_eq!(thinking[0].text.as_deref(), Some("t0"));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_state_keeps_frame_index() {
        let h = start(10);
        sleep_ms(150).await;
        let before = h.status.borrow().frame_index;
        assert_ne!(before, 0);

        h.updates.send(welcome(AvatarState::Idle)).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(h.status.borrow().frame_index, before);

        h.stop.send(()).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_keeps_rendering_last_state() {
        let h = start(10);
        h.updates.send(state(AvatarState::Thinking)).await.unwrap();
        drop(h.updates);
        sleep_ms(500).await;

        h.stop.send(()).unwrap();
        let sink = h.task.await.unwrap();
        let drawn = sink.drawn.lock().unwrap();
        assert!(drawn.len() >= 5);
        assert_eq!(drawn.last().unwrap().state, AvatarState::Thinking);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_state_renders_idle_frames() {
        let h = start(10);
        h.updates
            .send(state(AvatarState::Custom("dancing".into())))
            .await
            .unwrap();
        sleep_ms(150).await;

        h.stop.send(()).unwrap();
        let sink = h.task.await.unwrap();
        let drawn = sink.drawn.lock().unwrap();
        let custom = drawn
            .iter()
            .find(|d| d.state == AvatarState::Custom("dancing".into()))
            .unwrap();
        assert_eq!(custom.text.as_deref(), Some("i0"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_restores_the_sink() {
        let h = start(8);
        sleep_ms(10).await;
        h.stop.send(()).unwrap();
        let sink = h.task.await.unwrap();
        assert!(*sink.restored.lock().unwrap());
    }
}
