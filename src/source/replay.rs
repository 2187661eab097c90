//! Replays a directory of still images as a camera stream.

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use super::{streamer::Streamer, FrameBuffer, FrameCallback, FrameSource};
use crate::error::SourceError;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayConfig {
    pub dir: PathBuf,
    pub rate_hz: f64,
    /// Restart from the first image when the directory is exhausted.
    pub looping: bool,
}

pub struct ReplayFrameSource {
    config: ReplayConfig,
    streamer: Option<Streamer>,
}

impl ReplayFrameSource {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            streamer: None,
        }
    }
}

/// Image files in `dir`, sorted by name so numbered captures play in order.
fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| SourceError::Unavailable(format!("{}: {err}", dir.display())))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(SourceError::Unavailable(format!(
            "no image frames in {}",
            dir.display()
        )));
    }
    Ok(paths)
}

impl FrameSource for ReplayFrameSource {
    fn nominal_rate_hz(&self) -> f64 {
        self.config.rate_hz
    }

    fn start(&mut self, on_frame: FrameCallback) -> Result<(), SourceError> {
        if self.streamer.is_some() {
            return Err(SourceError::AlreadyStreaming);
        }
        let paths = list_frames(&self.config.dir)?;
        log_info!(
            "replaying {} frames from {} at {} Hz",
            paths.len(),
            self.config.dir.display(),
            self.config.rate_hz
        );

        let looping = self.config.looping;
        let produce = move |index: u64| {
            let mut index = index as usize;
            if index >= paths.len() {
                if !looping {
                    return None;
                }
                index %= paths.len();
            }
            let path = &paths[index];
            match image::open(path) {
                Ok(img) => Some(FrameBuffer::from(img.to_rgba8())),
                Err(err) => {
                    log_warn!("replay: stopping at unreadable frame {}: {err}", path.display());
                    None
                }
            }
        };

        let period = Duration::from_secs_f64(1.0 / self.config.rate_hz);
        self.streamer = Some(Streamer::spawn("replay-camera", period, produce, on_frame)?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut streamer) = self.streamer.take() {
            streamer.stop();
        }
    }

    fn set_torch(&mut self, _on: bool) -> Result<(), SourceError> {
        // Recorded frames already carry their lighting.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::sync::{Arc, Mutex};

    #[test]
    fn empty_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ReplayFrameSource::new(ReplayConfig {
            dir: dir.path().to_path_buf(),
            rate_hz: 30.0,
            looping: false,
        });
        assert!(matches!(
            source.start(Box::new(|_| {})),
            Err(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn plays_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, red) in [("frame_002.png", 20u8), ("frame_001.png", 10), ("notes.txt", 0)] {
            let path = dir.path().join(name);
            if name.ends_with(".png") {
                RgbaImage::from_pixel(8, 8, Rgba([red, 0, 0, 255])).save(&path).unwrap();
            } else {
                fs::write(&path, "not a frame").unwrap();
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut source = ReplayFrameSource::new(ReplayConfig {
            dir: dir.path().to_path_buf(),
            rate_hz: 500.0,
            looping: false,
        });
        source
            .start(Box::new(move |frame| {
                sink.lock().unwrap().push(frame.center_mean(8).r);
            }))
            .unwrap();

        // The stream ends by itself after two frames.
        for _ in 0..100 {
            if seen.lock().unwrap().len() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        source.stop();
        assert_eq!(*seen.lock().unwrap(), vec![10.0, 20.0]);
    }
}
