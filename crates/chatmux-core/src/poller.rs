//! Delivery scheduling: the per-conversation poll/diff/dispatch engine.
//!
//! One repeating task per conversation samples the terminal buffer, runs the
//! text pipeline, and converges the chat surface onto the latest state of
//! the active turn: creating the turn's message, editing its live tail,
//! splitting oversized output into immutable chunks, retiring the
//! interruption control after idle periods, and surfacing embedded
//! side-channel requests.
//!
//! All per-conversation mutable state lives here, owned by the tick routine
//! and the user-message dispatch handler; the pipeline stages themselves are
//! pure functions over text.

use crate::chrome::strip_chrome;
use crate::config::RelayConfig;
use crate::error::ChatmuxError;
use crate::gate::SendGate;
use crate::marker;
use crate::render::render;
use crate::sanitize::{strip_for_compare, strip_for_display};
use crate::segment::segment;
use crate::style::to_surface_style;
use crate::surface::ChatSurface;
use crate::terminal::TerminalSessions;
use crate::Result;
use chatmux_types::{MessageId, SideChannelRequest};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Notice posted once when a conversation's terminal session disappears.
const SESSION_ENDED_NOTICE: &str =
    "⚠️ The terminal session behind this conversation has ended.";

/// Events emitted by the relay for external handling.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A side-channel request marker was seen for the first time.
    SideChannel {
        conversation_id: Uuid,
        request: SideChannelRequest,
    },
    /// The terminal session vanished and the poller tore itself down.
    SessionEnded { conversation_id: Uuid },
}

/// What the poll loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Stop,
}

/// Turn-scoped output state for one conversation.
///
/// Owned exclusively by that conversation's tick routine and the
/// user-message dispatch handler.
#[derive(Debug)]
struct ConversationState {
    /// Last comparison-mode snapshot; "nothing changed" detector.
    last_stable: String,
    /// The currently editable message for the active turn, if any.
    in_flight: Option<MessageId>,
    /// Full formatted text produced for the current turn so far.
    turn_text: String,
    /// Byte offset into `turn_text` already finalized into immutable chunks.
    emitted_offset: usize,
    /// True from user-message dispatch until the first non-trivial output.
    awaiting_first_output: bool,
    /// When output content last changed; drives idle retirement.
    last_change: Instant,
    /// Whether the interruption control was already dropped this idle
    /// period.
    interrupt_retired: bool,
    /// Raw marker texts already surfaced for this conversation.
    seen_markers: HashSet<String>,
}

impl ConversationState {
    fn new() -> Self {
        Self {
            last_stable: String::new(),
            in_flight: None,
            turn_text: String::new(),
            emitted_offset: 0,
            awaiting_first_output: false,
            last_change: Instant::now(),
            interrupt_retired: false,
            seen_markers: HashSet::new(),
        }
    }

    /// Reset turn-scoped fields when a new user message is dispatched. The
    /// next tick then starts a fresh message thread for the new turn.
    fn begin_turn(&mut self) {
        self.in_flight = None;
        self.turn_text.clear();
        self.emitted_offset = 0;
        self.awaiting_first_output = true;
        self.last_change = Instant::now();
        self.interrupt_retired = false;
    }
}

struct Inner<T, S> {
    terminal: T,
    surface: S,
    config: RelayConfig,
    gate: SendGate,
    states: RwLock<HashMap<Uuid, Arc<Mutex<ConversationState>>>>,
    tasks: RwLock<HashMap<Uuid, JoinHandle<()>>>,
    event_tx: broadcast::Sender<RelayEvent>,
}

/// The relay engine: owns every conversation's poller and output state.
pub struct Relay<T, S> {
    inner: Arc<Inner<T, S>>,
}

impl<T, S> Clone for Relay<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: TerminalSessions, S: ChatSurface> Relay<T, S> {
    pub fn new(terminal: T, surface: S, config: RelayConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                terminal,
                surface,
                config,
                gate: SendGate::new(),
                states: RwLock::new(HashMap::new()),
                tasks: RwLock::new(HashMap::new()),
                event_tx,
            }),
        }
    }

    /// Subscribe to relay events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Register output state for a conversation without starting its timer.
    pub async fn attach(&self, conversation_id: Uuid) -> Result<()> {
        let mut states = self.inner.states.write().await;
        if states.contains_key(&conversation_id) {
            return Err(ChatmuxError::PollerAlreadyRunning(conversation_id));
        }
        states.insert(conversation_id, Arc::new(Mutex::new(ConversationState::new())));
        Ok(())
    }

    /// Start the repeating poller for a conversation.
    pub async fn start_poller(&self, conversation_id: Uuid) -> Result<()> {
        self.attach(conversation_id).await?;
        let relay = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(relay.inner.config.poll_interval);
            // A tick always completes before the next one fires; a missed
            // deadline delays rather than bunching ticks up.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if relay.tick(conversation_id).await == TickFlow::Stop {
                    break;
                }
            }
            relay.remove(conversation_id).await;
            info!(target: "chatmux::poll", "Poller for conversation {} stopped", conversation_id);
        });
        self.inner.tasks.write().await.insert(conversation_id, handle);
        info!(target: "chatmux::poll", "Poller for conversation {} started", conversation_id);
        Ok(())
    }

    /// Stop a conversation's poller and drop its state. Returns false if no
    /// poller was registered. I/O already in flight completes on its own.
    pub async fn stop_poller(&self, conversation_id: Uuid) -> bool {
        let task = self.inner.tasks.write().await.remove(&conversation_id);
        if let Some(handle) = &task {
            handle.abort();
        }
        let state = self.inner.states.write().await.remove(&conversation_id);
        task.is_some() || state.is_some()
    }

    /// Whether a conversation currently has output state registered.
    pub async fn is_active(&self, conversation_id: Uuid) -> bool {
        self.inner.states.read().await.contains_key(&conversation_id)
    }

    async fn remove(&self, conversation_id: Uuid) {
        self.inner.states.write().await.remove(&conversation_id);
        self.inner.tasks.write().await.remove(&conversation_id);
    }

    /// Handle a user's chat message: gate it, type it into the terminal,
    /// and reset the turn state so the next tick opens a fresh message.
    ///
    /// Returns false when the per-user send gate dropped the message.
    pub async fn dispatch_user_message(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        text: &str,
    ) -> Result<bool> {
        let state_arc = self
            .state_of(conversation_id)
            .await
            .ok_or(ChatmuxError::PollerNotFound(conversation_id))?;

        if !self
            .inner
            .gate
            .try_acquire(user_id, self.inner.config.min_send_interval)
        {
            debug!(target: "chatmux::poll", "Send gate dropped message from user {}", user_id);
            return Ok(false);
        }

        self.inner
            .terminal
            .send_keystrokes(conversation_id, text)
            .await?;

        let mut state = state_arc.lock().await;
        state.begin_turn();
        debug!(target: "chatmux::poll", "New turn started for conversation {}", conversation_id);
        Ok(true)
    }

    /// Inject the interrupt keystroke. Fire-and-forget; the poller keeps
    /// running and picks up whatever the terminal does next.
    pub async fn request_interrupt(&self, conversation_id: Uuid) -> Result<()> {
        self.inner.terminal.send_interrupt(conversation_id).await
    }

    async fn state_of(&self, conversation_id: Uuid) -> Option<Arc<Mutex<ConversationState>>> {
        self.inner.states.read().await.get(&conversation_id).cloned()
    }

    /// Run one poll cycle for a conversation.
    pub async fn tick(&self, conversation_id: Uuid) -> TickFlow {
        let Some(state_arc) = self.state_of(conversation_id).await else {
            return TickFlow::Stop;
        };
        let mut state = state_arc.lock().await;

        let raw = match self
            .inner
            .terminal
            .capture_buffer(conversation_id, self.inner.config.capture_lines)
            .await
        {
            Ok(raw) => raw,
            Err(e) if e.is_session_gone() => {
                info!(target: "chatmux::poll", "Terminal session gone for conversation {}", conversation_id);
                if let Err(notify_err) = self
                    .inner
                    .surface
                    .notify(conversation_id, SESSION_ENDED_NOTICE)
                    .await
                {
                    warn!(target: "chatmux::poll", "Failed to post session-ended notice: {}", notify_err);
                }
                let _ = self
                    .inner
                    .event_tx
                    .send(RelayEvent::SessionEnded { conversation_id });
                return TickFlow::Stop;
            }
            Err(e) => {
                warn!(target: "chatmux::poll", "Capture failed for conversation {}: {}", conversation_id, e);
                return TickFlow::Continue;
            }
        };

        let compare = strip_for_compare(&raw);
        if compare == state.last_stable {
            self.maybe_retire_interrupt(conversation_id, &mut state).await;
            return TickFlow::Continue;
        }

        // Content moved: restart the idle clock and re-arm retirement.
        state.last_change = Instant::now();
        state.interrupt_retired = false;

        self.scan_side_channel(conversation_id, &mut state, &compare);

        let formatted = run_pipeline(&raw);

        if formatted.chars().count() < self.inner.config.trivial_floor {
            if state.awaiting_first_output {
                if let Err(e) = self.inner.surface.show_typing(conversation_id).await {
                    debug!(target: "chatmux::poll", "Typing indicator failed: {}", e);
                }
            }
            state.last_stable = compare;
            return TickFlow::Continue;
        }
        state.awaiting_first_output = false;

        // The comparison snapshot can move (spinners, status noise) while
        // the rendered output stays put; skip the redundant edit then.
        if formatted == state.turn_text && state.in_flight.is_some() {
            state.last_stable = compare;
            return TickFlow::Continue;
        }

        if let Err(e) = self.emit(conversation_id, &mut state, &formatted).await {
            // Transient surface failure: end the tick without committing the
            // snapshot so the next tick retries the same delta.
            warn!(target: "chatmux::poll", "Message dispatch failed for conversation {}: {}", conversation_id, e);
            return TickFlow::Continue;
        }

        state.turn_text = formatted;
        state.last_stable = compare;
        TickFlow::Continue
    }

    /// Write the turn's formatted text out to the surface, splitting the
    /// live tail into finalized chunks whenever it exceeds the ceiling.
    async fn emit(
        &self,
        conversation_id: Uuid,
        state: &mut ConversationState,
        formatted: &str,
    ) -> Result<()> {
        let cfg = &self.inner.config;

        let mut offset = state.emitted_offset.min(formatted.len());
        while offset > 0 && !formatted.is_char_boundary(offset) {
            offset -= 1;
        }

        loop {
            let tail = &formatted[offset..];
            let Some(cut) = plan_cut(tail, cfg) else { break };
            let chunk = tail[..cut.chunk_end].trim_end();
            if let Some(message) = state.in_flight.take() {
                // Seal the current in-flight message with this chunk; it is
                // immutable from here on and keeps no interruption control.
                if let Err(e) = self
                    .inner
                    .surface
                    .edit_message(conversation_id, &message, chunk)
                    .await
                {
                    state.in_flight = Some(message);
                    return Err(e);
                }
                if let Err(e) = self
                    .inner
                    .surface
                    .retire_interrupt(conversation_id, &message)
                    .await
                {
                    debug!(target: "chatmux::poll", "Control removal on sealed chunk failed: {}", e);
                }
            } else {
                self.inner
                    .surface
                    .create_message(conversation_id, chunk, false)
                    .await?;
            }
            offset += cut.consumed;
            state.emitted_offset = offset;
        }

        let tail = &formatted[offset..];
        if tail.trim().is_empty() {
            return Ok(());
        }
        match &state.in_flight {
            Some(message) => {
                self.inner
                    .surface
                    .edit_message(conversation_id, message, tail)
                    .await?;
            }
            None => {
                let with_interrupt = !state.interrupt_retired;
                let id = self
                    .inner
                    .surface
                    .create_message(conversation_id, tail, with_interrupt)
                    .await?;
                state.in_flight = Some(id);
            }
        }
        Ok(())
    }

    /// Drop the interruption control once per idle period.
    async fn maybe_retire_interrupt(
        &self,
        conversation_id: Uuid,
        state: &mut ConversationState,
    ) {
        if state.interrupt_retired {
            return;
        }
        let Some(message) = state.in_flight.clone() else {
            return;
        };
        if state.last_change.elapsed() < self.inner.config.idle_retirement {
            return;
        }
        match self
            .inner
            .surface
            .retire_interrupt(conversation_id, &message)
            .await
        {
            Ok(()) => {
                debug!(target: "chatmux::poll", "Idle: interruption control retired for conversation {}", conversation_id);
                state.interrupt_retired = true;
            }
            Err(e) => {
                debug!(target: "chatmux::poll", "Control retirement failed, will retry: {}", e);
            }
        }
    }

    /// Surface each distinct side-channel marker exactly once.
    fn scan_side_channel(
        &self,
        conversation_id: Uuid,
        state: &mut ConversationState,
        compare: &str,
    ) {
        for request in marker::scan(conversation_id, compare) {
            if state.seen_markers.insert(request.raw.clone()) {
                debug!(
                    target: "chatmux::poll",
                    "Side-channel request {} detected for conversation {}",
                    request.keyword,
                    conversation_id
                );
                let _ = self.inner.event_tx.send(RelayEvent::SideChannel {
                    conversation_id,
                    request,
                });
            }
        }
    }
}

/// The full text pipeline for one captured buffer.
fn run_pipeline(raw: &str) -> String {
    let display = strip_for_display(raw);
    let styled = to_surface_style(&display);
    let cleaned = strip_chrome(&styled);
    render(&segment(&cleaned))
}

/// A planned cut of an oversized live tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cut {
    /// Byte end of the chunk within the tail.
    chunk_end: usize,
    /// Bytes of the tail consumed by this cut (includes a cut newline).
    consumed: usize,
}

/// Decide where to cut an oversized tail, or `None` if it fits in one
/// message. Prefers the last newline within the search window below the
/// split target; falls back to a hard cut at the target.
fn plan_cut(tail: &str, cfg: &RelayConfig) -> Option<Cut> {
    if tail.chars().count() <= cfg.message_limit {
        return None;
    }
    let target_byte = byte_of_char(tail, cfg.split_target);
    let window_byte = byte_of_char(
        tail,
        cfg.split_target.saturating_sub(cfg.split_search_window),
    );
    let min_byte = byte_of_char(tail, cfg.min_chunk);

    match tail[..target_byte]
        .rfind('\n')
        .filter(|&i| i >= window_byte && i > min_byte)
    {
        Some(i) => Some(Cut {
            chunk_end: i,
            consumed: i + 1,
        }),
        None => Some(Cut {
            chunk_end: target_byte,
            consumed: target_byte,
        }),
    }
}

/// Byte index of the `n`th character, clamped to the string length.
fn byte_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeTerminal {
        buffer: StdMutex<String>,
        dead: AtomicBool,
        sent: StdMutex<Vec<String>>,
        interrupts: AtomicU64,
    }

    impl FakeTerminal {
        fn set_buffer(&self, text: &str) {
            *self.buffer.lock().unwrap() = text.to_string();
        }
    }

    impl TerminalSessions for Arc<FakeTerminal> {
        async fn capture_buffer(&self, conversation_id: Uuid, _lines: u32) -> Result<String> {
            if self.dead.load(Ordering::SeqCst) {
                return Err(ChatmuxError::SessionNotFound(conversation_id));
            }
            Ok(self.buffer.lock().unwrap().clone())
        }

        async fn send_keystrokes(&self, _conversation_id: Uuid, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_interrupt(&self, _conversation_id: Uuid) -> Result<()> {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn session_exists(&self, _conversation_id: Uuid) -> bool {
            !self.dead.load(Ordering::SeqCst)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum SurfaceCall {
        Create {
            id: MessageId,
            text: String,
            with_interrupt: bool,
        },
        Edit {
            id: MessageId,
            text: String,
        },
        Retire {
            id: MessageId,
        },
        Typing,
        Notify(String),
    }

    #[derive(Default)]
    struct FakeSurface {
        calls: StdMutex<Vec<SurfaceCall>>,
        next_id: AtomicU64,
        fail_all: AtomicBool,
    }

    impl FakeSurface {
        fn calls(&self) -> Vec<SurfaceCall> {
            self.calls.lock().unwrap().clone()
        }

        fn creates(&self) -> Vec<SurfaceCall> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, SurfaceCall::Create { .. }))
                .collect()
        }

        fn retire_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, SurfaceCall::Retire { .. }))
                .count()
        }

        fn check_failure(&self) -> Result<()> {
            if self.fail_all.load(Ordering::SeqCst) {
                Err(ChatmuxError::SurfaceError("injected failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl ChatSurface for Arc<FakeSurface> {
        async fn create_message(
            &self,
            _conversation_id: Uuid,
            text: &str,
            with_interrupt: bool,
        ) -> Result<MessageId> {
            self.check_failure()?;
            let id = MessageId::new(format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
            self.calls.lock().unwrap().push(SurfaceCall::Create {
                id: id.clone(),
                text: text.to_string(),
                with_interrupt,
            });
            Ok(id)
        }

        async fn edit_message(
            &self,
            _conversation_id: Uuid,
            message: &MessageId,
            text: &str,
        ) -> Result<()> {
            self.check_failure()?;
            self.calls.lock().unwrap().push(SurfaceCall::Edit {
                id: message.clone(),
                text: text.to_string(),
            });
            Ok(())
        }

        async fn retire_interrupt(
            &self,
            _conversation_id: Uuid,
            message: &MessageId,
        ) -> Result<()> {
            self.check_failure()?;
            self.calls
                .lock()
                .unwrap()
                .push(SurfaceCall::Retire { id: message.clone() });
            Ok(())
        }

        async fn show_typing(&self, _conversation_id: Uuid) -> Result<()> {
            self.check_failure()?;
            self.calls.lock().unwrap().push(SurfaceCall::Typing);
            Ok(())
        }

        async fn notify(&self, _conversation_id: Uuid, text: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(SurfaceCall::Notify(text.to_string()));
            Ok(())
        }
    }

    fn test_relay(
        config: RelayConfig,
    ) -> (Relay<Arc<FakeTerminal>, Arc<FakeSurface>>, Arc<FakeTerminal>, Arc<FakeSurface>) {
        let terminal = Arc::new(FakeTerminal::default());
        let surface = Arc::new(FakeSurface::default());
        let relay = Relay::new(Arc::clone(&terminal), Arc::clone(&surface), config);
        (relay, terminal, surface)
    }

    fn quick_config() -> RelayConfig {
        RelayConfig {
            min_send_interval: Duration::ZERO,
            ..RelayConfig::default()
        }
    }

    async fn force_idle(relay: &Relay<Arc<FakeTerminal>, Arc<FakeSurface>>, id: Uuid) {
        let state_arc = relay.state_of(id).await.unwrap();
        let mut state = state_arc.lock().await;
        state.last_change = Instant::now() - Duration::from_secs(3600);
    }

    #[tokio::test]
    async fn test_unchanged_buffer_is_idempotent() {
        let (relay, terminal, surface) = test_relay(quick_config());
        let id = Uuid::new_v4();
        relay.attach(id).await.unwrap();
        terminal.set_buffer("❯ fix the bug\n\n● Done, fixed it.");

        relay.tick(id).await;
        relay.tick(id).await;

        let creates = surface.creates();
        assert_eq!(creates.len(), 1);
        match &creates[0] {
            SurfaceCall::Create {
                text,
                with_interrupt,
                ..
            } => {
                assert_eq!(text, "Done, fixed it.");
                assert!(*with_interrupt);
            }
            _ => unreachable!(),
        }
        // The second tick must not even edit.
        assert_eq!(surface.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_live_tail_edited_as_output_grows() {
        let (relay, terminal, surface) = test_relay(quick_config());
        let id = Uuid::new_v4();
        relay.attach(id).await.unwrap();

        terminal.set_buffer("❯ go\n● First paragraph.");
        relay.tick(id).await;
        terminal.set_buffer("❯ go\n● First paragraph.\n\nSecond paragraph.");
        relay.tick(id).await;

        let calls = surface.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], SurfaceCall::Create { .. }));
        match &calls[1] {
            SurfaceCall::Edit { text, .. } => {
                assert_eq!(text, "First paragraph.\n\nSecond paragraph.")
            }
            other => panic!("expected edit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_tail_is_split_into_sealed_chunks() {
        let config = RelayConfig {
            message_limit: 60,
            split_target: 55,
            split_search_window: 30,
            min_chunk: 5,
            min_send_interval: Duration::ZERO,
            ..RelayConfig::default()
        };
        let (relay, terminal, surface) = test_relay(config.clone());
        let id = Uuid::new_v4();
        relay.attach(id).await.unwrap();

        let long: String = (0..12)
            .map(|i| format!("line number {i} with some padding"))
            .collect::<Vec<_>>()
            .join("\n");
        terminal.set_buffer(&format!("❯ go\n● {long}"));
        relay.tick(id).await;

        let creates = surface.creates();
        assert!(creates.len() >= 2, "expected a split, got {:?}", creates);
        for (i, call) in creates.iter().enumerate() {
            let SurfaceCall::Create {
                text,
                with_interrupt,
                ..
            } = call
            else {
                unreachable!()
            };
            assert!(text.chars().count() <= config.message_limit);
            // Only the final live tail keeps the interruption control.
            assert_eq!(*with_interrupt, i == creates.len() - 1);
        }
        // Concatenation reproduces the turn text modulo cut-point whitespace.
        let rebuilt: String = creates
            .iter()
            .map(|c| match c {
                SurfaceCall::Create { text, .. } => text.clone(),
                _ => unreachable!(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let strip_ws = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        let state_arc = relay.state_of(id).await.unwrap();
        let turn_text = state_arc.lock().await.turn_text.clone();
        assert_eq!(strip_ws(&rebuilt), strip_ws(&turn_text));
    }

    #[tokio::test]
    async fn test_idle_retirement_fires_exactly_once_then_rearms() {
        let (relay, terminal, surface) = test_relay(quick_config());
        let id = Uuid::new_v4();
        relay.attach(id).await.unwrap();
        terminal.set_buffer("❯ go\n● Working on it.");
        relay.tick(id).await;
        assert_eq!(surface.retire_count(), 0);

        // Idle long enough: the control comes off, once.
        force_idle(&relay, id).await;
        relay.tick(id).await;
        assert_eq!(surface.retire_count(), 1);
        relay.tick(id).await;
        assert_eq!(surface.retire_count(), 1);

        // New content re-arms retirement without restoring the control.
        terminal.set_buffer("❯ go\n● Working on it.\n\nStill going.");
        relay.tick(id).await;
        let edits = surface
            .calls()
            .iter()
            .filter(|c| matches!(c, SurfaceCall::Edit { .. }))
            .count();
        assert_eq!(edits, 1);
        assert_eq!(surface.retire_count(), 1);

        force_idle(&relay, id).await;
        relay.tick(id).await;
        assert_eq!(surface.retire_count(), 2);
    }

    #[tokio::test]
    async fn test_session_gone_posts_one_notice_and_stops() {
        let (relay, terminal, surface) = test_relay(quick_config());
        let id = Uuid::new_v4();
        relay.attach(id).await.unwrap();
        let mut events = relay.subscribe();

        terminal.dead.store(true, Ordering::SeqCst);
        let flow = relay.tick(id).await;

        assert_eq!(flow, TickFlow::Stop);
        let notices = surface
            .calls()
            .iter()
            .filter(|c| matches!(c, SurfaceCall::Notify(_)))
            .count();
        assert_eq!(notices, 1);
        assert!(matches!(
            events.try_recv(),
            Ok(RelayEvent::SessionEnded { conversation_id }) if conversation_id == id
        ));
    }

    #[tokio::test]
    async fn test_typing_indicator_while_awaiting_first_output() {
        let (relay, terminal, surface) = test_relay(quick_config());
        let id = Uuid::new_v4();
        relay.attach(id).await.unwrap();

        terminal.set_buffer("❯");
        relay
            .dispatch_user_message(id, "alice", "do the thing")
            .await
            .unwrap();
        assert_eq!(
            terminal.sent.lock().unwrap().clone(),
            vec!["do the thing".to_string()]
        );

        // Echo appears but no real output yet.
        terminal.set_buffer("❯ do the thing\n✻ Pondering… (esc to interrupt)");
        relay.tick(id).await;

        let calls = surface.calls();
        assert_eq!(calls, vec![SurfaceCall::Typing]);
    }

    #[tokio::test]
    async fn test_new_user_message_starts_fresh_message_thread() {
        let (relay, terminal, surface) = test_relay(quick_config());
        let id = Uuid::new_v4();
        relay.attach(id).await.unwrap();

        terminal.set_buffer("❯ first\n● Answer one.");
        relay.tick(id).await;
        relay
            .dispatch_user_message(id, "alice", "second")
            .await
            .unwrap();
        terminal.set_buffer("❯ first\n● Answer one.\n❯ second\n● Answer two.");
        relay.tick(id).await;

        let creates = surface.creates();
        assert_eq!(creates.len(), 2);
        match (&creates[0], &creates[1]) {
            (
                SurfaceCall::Create { text: first, .. },
                SurfaceCall::Create { text: second, .. },
            ) => {
                assert_eq!(first, "Answer one.");
                assert_eq!(second, "Answer two.");
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_send_gate_drops_rapid_messages() {
        let config = RelayConfig {
            min_send_interval: Duration::from_secs(60),
            ..RelayConfig::default()
        };
        let (relay, terminal, _surface) = test_relay(config);
        let id = Uuid::new_v4();
        relay.attach(id).await.unwrap();

        assert!(relay.dispatch_user_message(id, "alice", "one").await.unwrap());
        assert!(!relay.dispatch_user_message(id, "alice", "two").await.unwrap());
        assert_eq!(terminal.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_side_channel_marker_emitted_once() {
        let (relay, terminal, _surface) = test_relay(quick_config());
        let id = Uuid::new_v4();
        relay.attach(id).await.unwrap();
        let mut events = relay.subscribe();

        terminal.set_buffer(
            "❯ go\n● Requesting.\n[SKILL_INSTALL: name=\"helper\" url=\"https://x.dev/p\"]",
        );
        relay.tick(id).await;
        // The marker is still in scrollback on the next changed tick.
        terminal.set_buffer(
            "❯ go\n● Requesting.\n[SKILL_INSTALL: name=\"helper\" url=\"https://x.dev/p\"]\n● More.",
        );
        relay.tick(id).await;

        let mut seen = 0;
        while let Ok(event) = events.try_recv() {
            if let RelayEvent::SideChannel { request, .. } = event {
                assert_eq!(request.keyword, "SKILL_INSTALL");
                assert_eq!(request.field("name"), Some("helper"));
                seen += 1;
            }
        }
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn test_surface_failure_retries_next_tick() {
        let (relay, terminal, surface) = test_relay(quick_config());
        let id = Uuid::new_v4();
        relay.attach(id).await.unwrap();

        terminal.set_buffer("❯ go\n● Hello there.");
        surface.fail_all.store(true, Ordering::SeqCst);
        relay.tick(id).await;
        assert!(surface.creates().is_empty());

        // Same buffer, surface healthy again: the tick self-heals.
        surface.fail_all.store(false, Ordering::SeqCst);
        relay.tick(id).await;
        assert_eq!(surface.creates().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_poller_removes_state() {
        let (relay, _terminal, _surface) = test_relay(quick_config());
        let id = Uuid::new_v4();
        relay.start_poller(id).await.unwrap();
        assert!(relay.is_active(id).await);
        assert!(relay.stop_poller(id).await);
        assert!(!relay.is_active(id).await);
        assert!(!relay.stop_poller(id).await);
    }

    #[tokio::test]
    async fn test_double_attach_rejected() {
        let (relay, _terminal, _surface) = test_relay(quick_config());
        let id = Uuid::new_v4();
        relay.attach(id).await.unwrap();
        assert!(matches!(
            relay.attach(id).await,
            Err(ChatmuxError::PollerAlreadyRunning(_))
        ));
    }

    fn tiny_config() -> RelayConfig {
        RelayConfig {
            message_limit: 100,
            split_target: 95,
            split_search_window: 30,
            min_chunk: 10,
            ..RelayConfig::default()
        }
    }

    fn split_all(text: &str, cfg: &RelayConfig) -> Vec<String> {
        let mut offset = 0;
        let mut out = Vec::new();
        loop {
            let tail = &text[offset..];
            match plan_cut(tail, cfg) {
                Some(cut) => {
                    out.push(tail[..cut.chunk_end].trim_end().to_string());
                    offset += cut.consumed;
                }
                None => {
                    if !tail.is_empty() {
                        out.push(tail.to_string());
                    }
                    return out;
                }
            }
        }
    }

    #[test]
    fn test_plan_cut_prefers_newline_in_window() {
        let cfg = tiny_config();
        let text = format!("{}\n{}", "a".repeat(80), "b".repeat(80));
        let cut = plan_cut(&text, &cfg).unwrap();
        assert_eq!(cut.chunk_end, 80);
        assert_eq!(cut.consumed, 81);
    }

    #[test]
    fn test_plan_cut_hard_cuts_without_suitable_newline() {
        let cfg = tiny_config();
        // Newline exists but before the minimum chunk size.
        let text = format!("ab\n{}", "c".repeat(200));
        let cut = plan_cut(&text, &cfg).unwrap();
        assert_eq!(cut.chunk_end, cfg.split_target);
        assert_eq!(cut.consumed, cfg.split_target);
    }

    #[test]
    fn test_plan_cut_none_when_under_limit() {
        let cfg = tiny_config();
        assert_eq!(plan_cut(&"x".repeat(100), &cfg), None);
    }

    proptest! {
        #[test]
        fn prop_chunks_respect_limit_and_roundtrip(text in "[a-zA-Z ❯●\n]{0,4000}") {
            let cfg = tiny_config();
            let chunks = split_all(&text, &cfg);
            for chunk in &chunks {
                prop_assert!(chunk.chars().count() <= cfg.message_limit);
            }
            let strip_ws = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
            let rebuilt: String = chunks.concat();
            prop_assert_eq!(strip_ws(&rebuilt), strip_ws(&text));
        }
    }
}
