//! The narrow surface handlers use to reach remote players.
//!
//! HTTP and chat handlers only need to route a command to a named player or
//! list the names that exist. They depend on these two capabilities rather
//! than on [`Registry`] itself.

use crate::envelope::Kind;
use crate::registry::{Registry, SendError};

/// Route a typed command to one destination.
pub trait Dispatch {
    fn send(&self, destination: &str, kind: Kind, data: &str) -> Result<(), SendError>;
}

/// Enumerate known destinations.
pub trait Directory {
    fn list(&self) -> Vec<String>;
}

impl Dispatch for Registry {
    fn send(&self, destination: &str, kind: Kind, data: &str) -> Result<(), SendError> {
        Registry::send(self, destination, kind, data)
    }
}

impl Directory for Registry {
    fn list(&self) -> Vec<String> {
        Registry::list(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to send play order to client: {0}")]
    Play(#[source] SendError),
    #[error("failed to send text to speech request to client: {0}")]
    Say(#[source] SendError),
}

impl DispatchError {
    /// The registry error underneath.
    pub fn cause(&self) -> &SendError {
        match self {
            DispatchError::Play(e) | DispatchError::Say(e) => e,
        }
    }

    pub fn is_not_registered(&self) -> bool {
        matches!(self.cause(), SendError::NotRegistered(_))
    }
}

/// Ask `destination` to play the sound called `sound`.
pub fn play_on<D: Dispatch + ?Sized>(d: &D, destination: &str, sound: &str) -> Result<(), DispatchError> {
    tracing::info!(destination = %destination, sound = %sound, "sending play order to registered client");
    d.send(destination, Kind::Sound, sound)
        .map_err(DispatchError::Play)
}

/// Ask `destination` to speak `text`.
pub fn say_on<D: Dispatch + ?Sized>(d: &D, destination: &str, text: &str) -> Result<(), DispatchError> {
    tracing::info!(destination = %destination, "sending text to speech order to registered client");
    d.send(destination, Kind::Tts, text)
        .map_err(DispatchError::Say)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records every routed command; knows a fixed set of destinations.
    struct Recorder {
        known: Vec<String>,
        sent: Mutex<Vec<(String, Kind, String)>>,
    }

    impl Recorder {
        fn new(known: &[&str]) -> Self {
            Self {
                known: known.iter().map(|s| s.to_string()).collect(),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl Dispatch for Recorder {
        fn send(&self, destination: &str, kind: Kind, data: &str) -> Result<(), SendError> {
            if !self.known.iter().any(|k| k == destination) {
                return Err(SendError::NotRegistered(destination.to_string()));
            }
            self.sent
                .lock()
                .push((destination.to_string(), kind, data.to_string()));
            Ok(())
        }
    }

    #[test]
    fn play_on_sends_sound_kind() {
        let rec = Recorder::new(&["hall"]);
        play_on(&rec, "hall", "tada").unwrap();
        assert_eq!(
            rec.sent.lock().as_slice(),
            &[("hall".to_string(), Kind::Sound, "tada".to_string())]
        );
    }

    #[test]
    fn say_on_sends_tts_kind() {
        let rec = Recorder::new(&["hall"]);
        say_on(&rec, "hall", "lunch time").unwrap();
        assert_eq!(rec.sent.lock()[0].1, Kind::Tts);
    }

    #[test]
    fn not_found_stays_inspectable() {
        let rec = Recorder::new(&[]);
        let err = say_on(&rec, "ghost", "boo").unwrap_err();
        assert!(err.is_not_registered());
        assert!(err.to_string().contains("\"ghost\" isn't registered"));
        assert!(rec.sent.lock().is_empty());
    }

    #[test]
    fn registry_is_usable_through_traits() {
        let registry = Registry::new();
        let directory: &dyn Directory = &registry;
        assert!(directory.list().is_empty());

        let dispatch: &dyn Dispatch = &registry;
        let err = play_on(dispatch, "nobody", "x").unwrap_err();
        assert!(err.is_not_registered());
    }
}
