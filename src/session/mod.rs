//! Session and role management
//!
//! At most one streaming session exists at a time. The first participant
//! to join becomes the host (Player, slot 1, full input permissions);
//! later arrivals spectate until promoted into one of the four player
//! slots. The host grants and revokes keyboard/mouse permissions.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::RwLock;

use serde::Serialize;

/// Session state machine failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    SessionExists,
    NoSession,
    NoSlotAvailable,
    AlreadyPlayer,
    NotAPlayer,
    NotHost,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::SessionExists => write!(f, "session already exists"),
            SessionError::NoSession => write!(f, "no active session"),
            SessionError::NoSlotAvailable => write!(f, "no player slot available"),
            SessionError::AlreadyPlayer => write!(f, "already a player"),
            SessionError::NotAPlayer => write!(f, "not a player"),
            SessionError::NotHost => write!(f, "only the host can perform this action"),
        }
    }
}

impl Error for SessionError {}

/// Participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Spectator,
}

/// Someone connected to the session.
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub role: Role,
    /// Gamepad slot 1-4; absent for spectators
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<u8>,
    pub is_host: bool,
    pub can_keyboard: bool,
    pub can_mouse: bool,
}

/// Current stream quality settings.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StreamSettings {
    pub bitrate: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

/// Snapshot of the session for API responses and broadcasts.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SessionState {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    pub players: Vec<Participant>,
    pub spectators: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<StreamSettings>,
}

/// Outcome of a [`SessionManager::leave`].
#[derive(Debug)]
pub struct LeaveOutcome {
    pub participant: Participant,
    /// True when the session was destroyed: the last participant left, or
    /// the host left with no Player to promote
    pub session_ended: bool,
}

struct Session {
    id: String,
    #[allow(dead_code)]
    app_id: i64,
    app_name: String,
    settings: StreamSettings,
    participants: HashMap<String, Participant>,
    /// slots[i] holds the id of the participant in slot i+1
    slots: [Option<String>; 4],
    host_id: String,
}

/// Holder of the at-most-one active session.
pub struct SessionManager {
    inner: RwLock<Option<Session>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Create the session. Refused while one exists.
    pub fn create(
        &self,
        app_id: i64,
        app_name: &str,
        settings: StreamSettings,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.write().unwrap();
        if inner.is_some() {
            return Err(SessionError::SessionExists);
        }

        *inner = Some(Session {
            id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            app_id,
            app_name: app_name.to_string(),
            settings,
            participants: HashMap::new(),
            slots: [None, None, None, None],
            host_id: String::new(),
        });

        Ok(())
    }

    /// Destroy the session regardless of participants.
    pub fn end(&self) {
        *self.inner.write().unwrap() = None;
    }

    pub fn is_active(&self) -> bool {
        self.inner.read().unwrap().is_some()
    }

    /// Add a participant. Idempotent by id. The first join becomes host
    /// with slot 1 and full permissions; later joins are spectators.
    pub fn join(&self, id: &str, name: &str) -> Result<Participant, SessionError> {
        let mut inner = self.inner.write().unwrap();
        let session = inner.as_mut().ok_or(SessionError::NoSession)?;

        if let Some(existing) = session.participants.get(id) {
            return Ok(existing.clone());
        }

        let is_host = session.participants.is_empty();
        let participant = Participant {
            id: id.to_string(),
            name: name.to_string(),
            role: if is_host { Role::Player } else { Role::Spectator },
            slot: if is_host { Some(1) } else { None },
            is_host,
            can_keyboard: is_host,
            can_mouse: is_host,
        };

        if is_host {
            session.slots[0] = Some(id.to_string());
            session.host_id = id.to_string();
        }
        session.participants.insert(id.to_string(), participant.clone());

        Ok(participant)
    }

    /// Remove a participant. When the host leaves, the Player in the
    /// lowest-numbered slot is promoted (keeping its slot); with no Player
    /// left, or no participants at all, the session ends.
    pub fn leave(&self, id: &str) -> Option<LeaveOutcome> {
        let mut inner = self.inner.write().unwrap();
        let session = inner.as_mut()?;

        let participant = session.participants.remove(id)?;
        if let Some(slot) = participant.slot {
            session.slots[slot as usize - 1] = None;
        }

        let mut session_ended = false;
        if participant.is_host {
            session.host_id.clear();
            let successor = session
                .slots
                .iter()
                .flatten()
                .next()
                .cloned();
            match successor {
                Some(next_id) => {
                    if let Some(next) = session.participants.get_mut(&next_id) {
                        next.is_host = true;
                        next.can_keyboard = true;
                        next.can_mouse = true;
                        session.host_id = next_id;
                    }
                }
                None => session_ended = true,
            }
        }

        if session.participants.is_empty() {
            session_ended = true;
        }

        if session_ended {
            *inner = None;
        }

        Some(LeaveOutcome {
            participant,
            session_ended,
        })
    }

    /// Promote a spectator into the lowest free player slot. Does not
    /// grant keyboard or mouse permissions.
    pub fn join_as_player(&self, id: &str) -> Result<Participant, SessionError> {
        let mut inner = self.inner.write().unwrap();
        let session = inner.as_mut().ok_or(SessionError::NoSession)?;

        let slot = {
            let participant = session
                .participants
                .get(id)
                .ok_or(SessionError::NoSession)?;
            if participant.role == Role::Player {
                return Err(SessionError::AlreadyPlayer);
            }

            session
                .slots
                .iter()
                .position(|s| s.is_none())
                .ok_or(SessionError::NoSlotAvailable)? as u8
                + 1
        };

        session.slots[slot as usize - 1] = Some(id.to_string());
        let participant = session.participants.get_mut(id).unwrap();
        participant.role = Role::Player;
        participant.slot = Some(slot);

        Ok(participant.clone())
    }

    /// Demote a non-host Player to spectator, clearing its slot and
    /// permissions. The host cannot spectate while hosting.
    pub fn spectate(&self, id: &str) -> Result<Participant, SessionError> {
        let mut inner = self.inner.write().unwrap();
        let session = inner.as_mut().ok_or(SessionError::NoSession)?;

        let participant = session
            .participants
            .get_mut(id)
            .ok_or(SessionError::NoSession)?;
        if participant.role != Role::Player {
            return Err(SessionError::NotAPlayer);
        }
        if participant.is_host {
            return Err(SessionError::NotHost);
        }

        let slot = participant.slot.take();
        participant.role = Role::Spectator;
        participant.can_keyboard = false;
        participant.can_mouse = false;
        let updated = participant.clone();

        if let Some(slot) = slot {
            session.slots[slot as usize - 1] = None;
        }

        Ok(updated)
    }

    /// Host-only: grant or revoke keyboard permission on a participant.
    pub fn set_keyboard_permission(
        &self,
        host_id: &str,
        target_id: &str,
        allowed: bool,
    ) -> Result<Participant, SessionError> {
        self.set_permission(host_id, target_id, |p| p.can_keyboard = allowed)
    }

    /// Host-only: grant or revoke mouse permission on a participant.
    pub fn set_mouse_permission(
        &self,
        host_id: &str,
        target_id: &str,
        allowed: bool,
    ) -> Result<Participant, SessionError> {
        self.set_permission(host_id, target_id, |p| p.can_mouse = allowed)
    }

    fn set_permission(
        &self,
        host_id: &str,
        target_id: &str,
        mutate: impl FnOnce(&mut Participant),
    ) -> Result<Participant, SessionError> {
        let mut inner = self.inner.write().unwrap();
        let session = inner.as_mut().ok_or(SessionError::NoSession)?;

        if session.host_id != host_id {
            return Err(SessionError::NotHost);
        }

        let participant = session
            .participants
            .get_mut(target_id)
            .ok_or(SessionError::NoSession)?;
        mutate(participant);
        // Host permissions are immutable
        if participant.is_host {
            participant.can_keyboard = true;
            participant.can_mouse = true;
        }

        Ok(participant.clone())
    }

    /// Host-only: record new stream quality settings. The running stream
    /// is not reconfigured live.
    pub fn set_quality(
        &self,
        host_id: &str,
        settings: StreamSettings,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.write().unwrap();
        let session = inner.as_mut().ok_or(SessionError::NoSession)?;

        if session.host_id != host_id {
            return Err(SessionError::NotHost);
        }

        session.settings = settings;
        Ok(())
    }

    pub fn participant(&self, id: &str) -> Option<Participant> {
        let inner = self.inner.read().unwrap();
        inner.as_ref()?.participants.get(id).cloned()
    }

    pub fn is_host(&self, id: &str) -> bool {
        let inner = self.inner.read().unwrap();
        inner.as_ref().map(|s| s.host_id == id).unwrap_or(false)
    }

    pub fn can_keyboard(&self, id: &str) -> bool {
        self.participant(id).map(|p| p.can_keyboard).unwrap_or(false)
    }

    pub fn can_mouse(&self, id: &str) -> bool {
        self.participant(id).map(|p| p.can_mouse).unwrap_or(false)
    }

    /// Whether the participant may produce any input class at all: a
    /// gamepad slot or either pointer permission.
    pub fn can_input(&self, id: &str) -> bool {
        self.participant(id)
            .map(|p| p.can_keyboard || p.can_mouse || p.slot.is_some())
            .unwrap_or(false)
    }

    /// Gamepad slot for a participant, if it holds one.
    pub fn slot_of(&self, id: &str) -> Option<u8> {
        self.participant(id).and_then(|p| p.slot)
    }

    /// Bitmask of occupied slots: bit i set iff slot i+1 is held.
    pub fn active_gamepads(&self) -> u8 {
        let inner = self.inner.read().unwrap();
        let Some(session) = inner.as_ref() else {
            return 0;
        };
        session
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .fold(0u8, |mask, (i, _)| mask | (1 << i))
    }

    /// Full state snapshot: players ordered by slot, spectator count.
    pub fn state(&self) -> SessionState {
        let inner = self.inner.read().unwrap();
        let Some(session) = inner.as_ref() else {
            return SessionState::default();
        };

        let players = session
            .slots
            .iter()
            .flatten()
            .filter_map(|id| session.participants.get(id).cloned())
            .collect();
        let spectators = session
            .participants
            .values()
            .filter(|p| p.role == Role::Spectator)
            .count();

        SessionState {
            active: true,
            id: Some(session.id.clone()),
            app_name: Some(session.app_name.clone()),
            players,
            spectators,
            settings: Some(session.settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> StreamSettings {
        StreamSettings {
            bitrate: 10_000,
            fps: 60,
            width: 1920,
            height: 1080,
        }
    }

    fn manager_with_session() -> SessionManager {
        let mgr = SessionManager::new();
        mgr.create(0, "Desktop", settings()).unwrap();
        mgr
    }

    #[test]
    fn create_is_singleton() {
        let mgr = manager_with_session();
        assert_eq!(
            mgr.create(0, "Desktop", settings()).unwrap_err(),
            SessionError::SessionExists
        );
    }

    #[test]
    fn first_join_becomes_host_with_slot_one() {
        let mgr = manager_with_session();
        let host = mgr.join("a", "Alice").unwrap();
        assert!(host.is_host);
        assert_eq!(host.role, Role::Player);
        assert_eq!(host.slot, Some(1));
        assert!(host.can_keyboard && host.can_mouse);
        assert_eq!(mgr.active_gamepads(), 0b0001);
    }

    #[test]
    fn later_joins_are_spectators_without_permissions() {
        let mgr = manager_with_session();
        mgr.join("a", "Alice").unwrap();
        let spec = mgr.join("b", "Bob").unwrap();
        assert!(!spec.is_host);
        assert_eq!(spec.role, Role::Spectator);
        assert_eq!(spec.slot, None);
        assert!(!spec.can_keyboard && !spec.can_mouse);
    }

    #[test]
    fn join_is_idempotent_by_id() {
        let mgr = manager_with_session();
        let first = mgr.join("a", "Alice").unwrap();
        let again = mgr.join("a", "Other").unwrap();
        assert_eq!(again.name, first.name);
        assert!(again.is_host);
    }

    #[test]
    fn promote_allocates_lowest_free_slot() {
        let mgr = manager_with_session();
        mgr.join("a", "Alice").unwrap();
        mgr.join("b", "Bob").unwrap();
        mgr.join("c", "Carol").unwrap();

        let b = mgr.join_as_player("b").unwrap();
        assert_eq!(b.slot, Some(2));
        assert!(!b.can_keyboard && !b.can_mouse);

        let c = mgr.join_as_player("c").unwrap();
        assert_eq!(c.slot, Some(3));
        assert_eq!(mgr.active_gamepads(), 0b0111);

        // b drops back to spectating; the freed slot is reused next
        mgr.spectate("b").unwrap();
        mgr.join("d", "Dave").unwrap();
        let d = mgr.join_as_player("d").unwrap();
        assert_eq!(d.slot, Some(2));
    }

    #[test]
    fn fifth_player_is_refused_and_slots_unchanged() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        for id in ["b", "c", "d"] {
            mgr.join(id, id).unwrap();
            mgr.join_as_player(id).unwrap();
        }
        mgr.join("e", "E").unwrap();

        assert_eq!(
            mgr.join_as_player("e").unwrap_err(),
            SessionError::NoSlotAvailable
        );
        assert_eq!(mgr.active_gamepads(), 0b1111);
        assert_eq!(mgr.participant("e").unwrap().role, Role::Spectator);
    }

    #[test]
    fn promote_twice_is_already_player() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        mgr.join("b", "B").unwrap();
        mgr.join_as_player("b").unwrap();
        assert_eq!(
            mgr.join_as_player("b").unwrap_err(),
            SessionError::AlreadyPlayer
        );
    }

    #[test]
    fn host_cannot_spectate() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        assert_eq!(mgr.spectate("a").unwrap_err(), SessionError::NotHost);
        let host = mgr.participant("a").unwrap();
        assert!(host.is_host);
        assert_eq!(host.slot, Some(1));
    }

    #[test]
    fn spectate_requires_player() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        mgr.join("b", "B").unwrap();
        assert_eq!(mgr.spectate("b").unwrap_err(), SessionError::NotAPlayer);
    }

    #[test]
    fn permissions_are_host_only() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        mgr.join("b", "B").unwrap();

        assert_eq!(
            mgr.set_keyboard_permission("b", "b", true).unwrap_err(),
            SessionError::NotHost
        );

        let b = mgr.set_keyboard_permission("a", "b", true).unwrap();
        assert!(b.can_keyboard);
        assert!(!b.can_mouse);
        assert!(mgr.can_keyboard("b"));
        assert!(!mgr.can_mouse("b"));
        assert!(mgr.can_input("b"));
    }

    #[test]
    fn spectator_without_grants_cannot_input() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        mgr.join("b", "B").unwrap();
        assert!(mgr.can_input("a"));
        assert!(!mgr.can_input("b"));

        mgr.join_as_player("b").unwrap();
        assert!(mgr.can_input("b"));
    }

    #[test]
    fn host_permissions_are_immutable() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        let host = mgr.set_keyboard_permission("a", "a", false).unwrap();
        assert!(host.can_keyboard);
        assert!(host.can_mouse);
    }

    #[test]
    fn host_leave_promotes_lowest_slot_player() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        mgr.join("b", "B").unwrap();
        mgr.join("c", "C").unwrap();
        mgr.join_as_player("b").unwrap(); // slot 2
        mgr.join_as_player("c").unwrap(); // slot 3

        let outcome = mgr.leave("a").unwrap();
        assert!(!outcome.session_ended);

        let b = mgr.participant("b").unwrap();
        assert!(b.is_host);
        assert!(b.can_keyboard && b.can_mouse);
        // The promoted host keeps its slot so gamepad routing is stable
        assert_eq!(b.slot, Some(2));
        assert_eq!(mgr.active_gamepads(), 0b0110);

        // Exactly one host remains
        assert!(!mgr.participant("c").unwrap().is_host);
    }

    #[test]
    fn host_leave_without_players_ends_session() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        mgr.join("b", "B").unwrap(); // spectator

        let outcome = mgr.leave("a").unwrap();
        assert!(outcome.session_ended);
        assert!(!mgr.is_active());
    }

    #[test]
    fn last_leaver_ends_session() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        let outcome = mgr.leave("a").unwrap();
        assert!(outcome.session_ended);
        assert!(!mgr.is_active());
    }

    #[test]
    fn leave_clears_slot() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        mgr.join("b", "B").unwrap();
        mgr.join_as_player("b").unwrap();

        mgr.leave("b").unwrap();
        assert_eq!(mgr.active_gamepads(), 0b0001);
        assert_eq!(mgr.slot_of("b"), None);
    }

    #[test]
    fn state_snapshot_orders_players_by_slot() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        mgr.join("b", "B").unwrap();
        mgr.join("c", "C").unwrap();
        mgr.join_as_player("c").unwrap();

        let state = mgr.state();
        assert!(state.active);
        assert_eq!(state.players.len(), 2);
        assert_eq!(state.players[0].id, "a");
        assert_eq!(state.players[1].id, "c");
        assert_eq!(state.spectators, 1);
        assert_eq!(state.settings.unwrap().fps, 60);
    }

    #[test]
    fn empty_manager_state_is_inactive() {
        let mgr = SessionManager::new();
        let state = mgr.state();
        assert!(!state.active);
        assert!(state.players.is_empty());
        assert_eq!(mgr.active_gamepads(), 0);
    }

    #[test]
    fn set_quality_updates_settings() {
        let mgr = manager_with_session();
        mgr.join("a", "A").unwrap();
        mgr.join("b", "B").unwrap();

        let new = StreamSettings {
            bitrate: 20_000,
            fps: 120,
            width: 2560,
            height: 1440,
        };
        assert_eq!(
            mgr.set_quality("b", new).unwrap_err(),
            SessionError::NotHost
        );
        mgr.set_quality("a", new).unwrap();
        assert_eq!(mgr.state().settings.unwrap().bitrate, 20_000);
    }
}
