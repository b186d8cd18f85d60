//! `/bell` chat slash command.
//!
//! The answer is returned in the HTTP response body, which the chat server
//! posts back to the channel.

use std::sync::Arc;

use axum::{extract::State, Form, Json};
use serde::{Deserialize, Serialize};

use crate::dispatch::{self, Directory};
use crate::playback::Player;
use crate::sound::Sound;
use crate::tts::Synthesizer;

use super::error::ApiError;
use super::AppState;

const USAGE: &str = "No subcommand specified, please use the following (list|clients|play|say)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(super) enum ResponseType {
    /// Only seen by the user who typed the command.
    Ephemeral,
    InChannel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct SlashCommandResponse {
    pub response_type: ResponseType,
    pub text: String,
}

impl SlashCommandResponse {
    fn ephemeral(text: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::Ephemeral,
            text: text.into(),
        }
    }

    fn in_channel(text: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::InChannel,
            text: text.into(),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct SlashCommandForm {
    #[serde(default)]
    token: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, PartialEq, Eq)]
pub(super) enum ChatCommand {
    List,
    Clients,
    Play {
        sound: String,
        by_tag: bool,
        destination: Option<String>,
    },
    Say {
        text: String,
        destination: Option<String>,
    },
}

/// Parse the argument text of the slash command.
pub(super) fn parse(text: &str) -> Result<ChatCommand, String> {
    let mut args = text.split_whitespace();
    let Some(command) = args.next() else {
        return Err(USAGE.to_string());
    };

    match command {
        "list" => Ok(ChatCommand::List),
        "clients" => Ok(ChatCommand::Clients),
        "play" => {
            let mut by_tag = false;
            let mut destination = None;
            let mut sound = None;
            while let Some(arg) = args.next() {
                match arg {
                    "-t" => by_tag = true,
                    "-d" => {
                        let dest = args.next().ok_or("Option -d needs a destination")?;
                        destination = Some(dest.to_string());
                    }
                    _ if sound.is_none() => sound = Some(arg.to_string()),
                    _ => return Err(format!("Unexpected argument {:?}", arg)),
                }
            }
            let sound = sound.ok_or("Cannot guess what sound to play")?;
            Ok(ChatCommand::Play {
                sound,
                by_tag,
                destination,
            })
        }
        "say" => {
            let mut rest: Vec<&str> = args.collect();
            let mut destination = None;
            if rest.first() == Some(&"-d") {
                if rest.len() < 2 {
                    return Err("Option -d needs a destination".to_string());
                }
                destination = Some(rest[1].to_string());
                rest.drain(..2);
            }
            if rest.is_empty() {
                return Err("Nothing to say".to_string());
            }
            Ok(ChatCommand::Say {
                text: rest.join(" "),
                destination,
            })
        }
        _ => Err("This command isn't supported".to_string()),
    }
}

pub(super) async fn slash_command(
    State(state): State<AppState>,
    Form(form): Form<SlashCommandForm>,
) -> Result<Json<SlashCommandResponse>, ApiError> {
    if let Some(expected) = &state.mattermost_token {
        if form.token != *expected {
            tracing::warn!("rejected chat command with invalid token");
            return Err(ApiError::AuthInvalid);
        }
    }

    let response = match parse(&form.text) {
        Ok(command) => execute(&state, command),
        Err(usage) => SlashCommandResponse::ephemeral(usage),
    };
    Ok(Json(response))
}

fn execute(state: &AppState, command: ChatCommand) -> SlashCommandResponse {
    match command {
        ChatCommand::List => SlashCommandResponse::ephemeral(format_sounds(&state.sounds.list())),
        ChatCommand::Clients => {
            let clients = Directory::list(&state.registry);
            if clients.is_empty() {
                SlashCommandResponse::ephemeral("No client registered")
            } else {
                SlashCommandResponse::ephemeral(format!("Registered clients: {}", clients.join(", ")))
            }
        }
        ChatCommand::Play {
            sound,
            by_tag,
            destination,
        } => {
            let found = if by_tag {
                state.sounds.by_tag(&sound)
            } else {
                state
                    .sounds
                    .get(&sound)
                    .ok_or_else(|| crate::sound::SoundError::NotFound(sound.clone()))
            };
            let found = match found {
                Ok(found) => found,
                Err(e) => return SlashCommandResponse::ephemeral(format!("Failed to play the sound: {}", e)),
            };

            match destination {
                Some(dest) => match dispatch::play_on(&state.registry, &dest, &found.name) {
                    Ok(()) => SlashCommandResponse::in_channel(format!(
                        ":musical_note: {:?} is playing on {} :musical_note:",
                        found.name, dest
                    )),
                    Err(e) => SlashCommandResponse::ephemeral(format!("Failed to play the sound: {}", e)),
                },
                None => {
                    spawn_playback(state.player.clone(), state.sounds.path_of(&found));
                    SlashCommandResponse::in_channel(format!(
                        ":musical_note: {:?} is playing :musical_note:",
                        found.name
                    ))
                }
            }
        }
        ChatCommand::Say { text, destination } => match destination {
            Some(dest) => match dispatch::say_on(&state.registry, &dest, &text) {
                Ok(()) => SlashCommandResponse::in_channel(text),
                Err(e) => SlashCommandResponse::ephemeral(format!(":broken_heart: something went wrong: {}", e)),
            },
            None => {
                spawn_speech(state.tts.clone(), state.player.clone(), text.clone());
                SlashCommandResponse::in_channel(text)
            }
        },
    }
}

// Chat servers time out slash commands after a few seconds, so local
// output runs in the background.
fn spawn_playback(player: Arc<dyn Player>, path: std::path::PathBuf) {
    tokio::spawn(async move {
        if let Err(e) = player.play(&path).await {
            tracing::error!(error = %e, path = %path.display(), "local playback failed");
        }
    });
}

fn spawn_speech(tts: Arc<dyn Synthesizer>, player: Arc<dyn Player>, text: String) {
    tokio::spawn(async move {
        match tts.synthesize(&text).await {
            Ok(path) => {
                if let Err(e) = player.play(&path).await {
                    tracing::error!(error = %e, "local speech playback failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "speech synthesis failed"),
        }
    });
}

fn format_sounds(sounds: &[Sound]) -> String {
    if sounds.is_empty() {
        return "No sounds found".to_string();
    }
    let mut out = String::from("|Sound|Tags|\n|:--|:--|\n");
    for sound in sounds {
        out.push_str(&format!("|{}|{}|\n", sound.name, sound.tags.join(",")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_gives_usage() {
        assert_eq!(parse("  ").unwrap_err(), USAGE);
    }

    #[test]
    fn unknown_subcommand() {
        assert_eq!(parse("dance").unwrap_err(), "This command isn't supported");
    }

    #[test]
    fn play_with_options_in_any_order() {
        assert_eq!(
            parse("play -d hall -t win").unwrap(),
            ChatCommand::Play {
                sound: "win".into(),
                by_tag: true,
                destination: Some("hall".into()),
            }
        );
        assert_eq!(
            parse("play gong").unwrap(),
            ChatCommand::Play {
                sound: "gong".into(),
                by_tag: false,
                destination: None,
            }
        );
    }

    #[test]
    fn play_argument_errors() {
        assert_eq!(parse("play").unwrap_err(), "Cannot guess what sound to play");
        assert!(parse("play -d").is_err());
        assert!(parse("play a b").is_err());
    }

    #[test]
    fn say_keeps_the_whole_sentence() {
        assert_eq!(
            parse("say -d kitchen lunch is   ready -d").unwrap(),
            ChatCommand::Say {
                text: "lunch is ready -d".into(),
                destination: Some("kitchen".into()),
            }
        );
        assert!(parse("say").is_err());
        assert!(parse("say -d kitchen").is_err());
    }

    #[test]
    fn sounds_table() {
        assert_eq!(format_sounds(&[]), "No sounds found");
        let table = format_sounds(&[Sound {
            name: "gong".into(),
            file_name: "gong.mp3".into(),
            tags: vec!["a".into(), "b".into()],
        }]);
        assert_eq!(table, "|Sound|Tags|\n|:--|:--|\n|gong|a,b|\n");
    }

    #[test]
    fn response_serializes_for_chat_server() {
        let json = serde_json::to_value(SlashCommandResponse::in_channel("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"response_type": "in_channel", "text": "hi"}));
    }
}
