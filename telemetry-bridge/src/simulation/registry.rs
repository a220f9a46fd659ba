/**
 * SESSION REGISTRY - Sessions du générateur et leur job de simulation
 *
 * RÔLE : associe chaque session ouverte à son canal d'événements et à au plus
 * un job actif. Fermer une session annule son job et retire l'entrée.
 * Une session ne voit jamais le job d'une autre : toutes les opérations sont
 * indexées par l'identifiant de la session appelante.
 */

use super::protocol::SessionEvent;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Job périodique d'une session ; `cancel` arrête ses ticks
#[derive(Debug, Clone)]
pub struct SimulationJob {
    pub id: u64,
    pub stations: Vec<String>,
    pub params: Map<String, Value>,
    cancel: CancellationToken,
}

impl SimulationJob {
    pub fn new(id: u64, stations: Vec<String>, params: Map<String, Value>, cancel: CancellationToken) -> Self {
        Self {
            id,
            stations,
            params,
            cancel,
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

struct SessionEntry {
    events: EventSender,
    job: Option<SimulationJob>,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, events: EventSender) -> SessionId {
        let id = SessionId::new();
        self.sessions.lock().insert(id, SessionEntry { events, job: None });
        id
    }

    /// Envoie un événement à la session ; faux si elle est fermée
    pub fn emit(&self, session: SessionId, event: SessionEvent) -> bool {
        let sessions = self.sessions.lock();
        match sessions.get(&session) {
            Some(entry) => entry.events.send(event).is_ok(),
            None => false,
        }
    }

    /// Installe le job de la session après avoir annulé le précédent.
    /// Si la session n'existe plus, le job est annulé et `false` est retourné.
    pub fn install_job(&self, session: SessionId, job: SimulationJob) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.get_mut(&session) else {
            job.cancel();
            return false;
        };
        if let Some(previous) = entry.job.take() {
            previous.cancel();
        }
        entry.job = Some(job);
        true
    }

    /// Annule le job de la session ; faux s'il n'y en avait pas
    pub fn cancel_job(&self, session: SessionId) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&session).and_then(|entry| entry.job.take()) {
            Some(job) => {
                job.cancel();
                true
            }
            None => false,
        }
    }

    /// Annule le job seulement s'il est toujours celui identifié par `job_id`
    pub fn finish_job(&self, session: SessionId, job_id: u64) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.get_mut(&session) else {
            return false;
        };
        if entry.job.as_ref().map(|job| job.id) != Some(job_id) {
            return false;
        }
        if let Some(job) = entry.job.take() {
            job.cancel();
        }
        true
    }

    /// Retire la session et annule son job ; faux si elle était inconnue
    pub fn close(&self, session: SessionId) -> bool {
        match self.sessions.lock().remove(&session) {
            Some(entry) => {
                if let Some(job) = entry.job {
                    job.cancel();
                }
                true
            }
            None => false,
        }
    }

    pub fn active_job(&self, session: SessionId) -> Option<SimulationJob> {
        self.sessions.lock().get(&session).and_then(|entry| entry.job.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn running_count(&self) -> usize {
        self.sessions.lock().values().filter(|entry| entry.job.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: u64) -> (SimulationJob, CancellationToken) {
        let token = CancellationToken::new();
        (SimulationJob::new(id, vec!["A1".into()], Map::new(), token.clone()), token)
    }

    #[test]
    fn test_install_cancels_previous_job() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = registry.open(tx);

        let (first, first_token) = job(1);
        let (second, second_token) = job(2);
        assert!(registry.install_job(session, first));
        assert!(registry.install_job(session, second));

        assert!(first_token.is_cancelled());
        assert!(!second_token.is_cancelled());
        assert_eq!(registry.active_job(session).map(|j| j.id), Some(2));
        assert_eq!(registry.running_count(), 1);
    }

    #[test]
    fn test_install_on_closed_session_cancels_job() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = registry.open(tx);
        registry.close(session);

        let (orphan, token) = job(1);
        assert!(!registry.install_job(session, orphan));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_close_cancels_and_removes() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = registry.open(tx);
        let (running, token) = job(1);
        registry.install_job(session, running);

        assert!(registry.close(session));
        assert!(token.is_cancelled());
        assert_eq!(registry.session_count(), 0);
        assert!(!registry.emit(session, SessionEvent::status("late")));
        assert!(!registry.close(session));
    }

    #[test]
    fn test_finish_job_ignores_replaced_job() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = registry.open(tx);
        let (first, _) = job(1);
        let (second, second_token) = job(2);
        registry.install_job(session, first);
        registry.install_job(session, second);

        assert!(!registry.finish_job(session, 1));
        assert!(!second_token.is_cancelled());
        assert!(registry.finish_job(session, 2));
        assert!(second_token.is_cancelled());
        assert!(registry.active_job(session).is_none());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.open(tx_a);
        let b = registry.open(tx_b);
        let (job_a, token_a) = job(1);
        registry.install_job(a, job_a);

        assert!(!registry.cancel_job(b));
        assert!(!token_a.is_cancelled());

        registry.emit(b, SessionEvent::status("only b"));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), SessionEvent::status("only b"));
    }
}
