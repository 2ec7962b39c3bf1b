//! Sound playback through an external player command

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::SoundConfig;
use crate::pill::SoundCue;

use super::SoundPlayer;

/// Plays one sound file per cue with a configured player program
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
    files: HashMap<SoundCue, PathBuf>,
}

impl CommandPlayer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            files: HashMap::new(),
        }
    }

    pub fn with_file(mut self, cue: SoundCue, path: impl Into<PathBuf>) -> Self {
        self.files.insert(cue, path.into());
        self
    }

    pub fn from_config(config: &SoundConfig) -> Self {
        let mut player = Self::new(config.player.clone(), config.player_args.clone());
        for (cue, path) in [
            (SoundCue::Start, &config.start),
            (SoundCue::Ending, &config.ending),
            (SoundCue::Error, &config.error),
        ] {
            if let Some(path) = path {
                player = player.with_file(cue, path.clone());
            }
        }
        player
    }

    /// Sound file for `cue`, if one is configured and present on disk
    pub fn resolve(&self, cue: SoundCue) -> Option<&Path> {
        let path = self.files.get(&cue)?;
        if path.is_file() {
            Some(path)
        } else {
            warn!(%cue, ?path, "sound file missing");
            None
        }
    }
}

impl SoundPlayer for CommandPlayer {
    fn play(&self, cue: SoundCue) {
        let Some(path) = self.resolve(cue) else {
            return;
        };

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(_child) => debug!(%cue, program = %self.program, "sound started"),
            Err(e) => warn!(?e, %cue, program = %self.program, "failed to start sound player"),
        }
    }
}

/// Logs cues without playing anything
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentPlayer;

impl SoundPlayer for SilentPlayer {
    fn play(&self, cue: SoundCue) {
        info!(%cue, "sound cue (muted)");
    }
}
