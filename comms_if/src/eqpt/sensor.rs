//! # Depth sensor interface
//!
//! The locator pulls one colored cloud per `update()` call. The sensor is also told the current
//! mission stage, since drivers change their own processing (exposure, image ROI) as the course
//! progresses.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, trace};
use thiserror::Error;

use super::cloud::PointCloud;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A source of colored point clouds.
pub trait Sensor: Send {
    /// Block until the next frame is available and make it the current cloud.
    fn update(&mut self) -> Result<(), SensorError>;

    /// The most recently acquired cloud.
    fn cloud(&self) -> &PointCloud;

    /// Mirror of the mission stage index, written by the locator on every stage change.
    fn set_stage(&mut self, stage: u8);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A sensor replaying previously recorded clouds, either held in memory or stored as one JSON
/// file per frame in a directory.
#[derive(Debug)]
pub struct ReplaySensor {
    source: ReplaySource,
    next: usize,
    looping: bool,
    current: PointCloud,
    stage: u8,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("No more frames available")]
    EndOfStream,

    #[error("No frames found in {0:?}")]
    NoFrames(PathBuf),

    #[error("IO error while reading frames: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse frame {0:?}: {1}")]
    Parse(PathBuf, serde_json::Error),

    #[error("Device error: {0}")]
    Device(String),
}

#[derive(Debug)]
enum ReplaySource {
    Memory(Vec<PointCloud>),
    Files(Vec<PathBuf>),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ReplaySensor {
    /// Replay the given frames in order.
    pub fn from_frames(frames: Vec<PointCloud>) -> Self {
        Self::new(ReplaySource::Memory(frames))
    }

    /// Replay all `*.json` clouds in the directory, in file name order.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, SensorError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();

        if paths.is_empty() {
            return Err(SensorError::NoFrames(dir.as_ref().to_path_buf()));
        }

        paths.sort();

        debug!("Replaying {} frames from {:?}", paths.len(), dir.as_ref());

        Ok(Self::new(ReplaySource::Files(paths)))
    }

    /// Restart from the first frame once the last one has been served.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Last stage index written by the locator.
    pub fn stage(&self) -> u8 {
        self.stage
    }

    fn new(source: ReplaySource) -> Self {
        Self {
            source,
            next: 0,
            looping: false,
            current: PointCloud::new(),
            stage: 0,
        }
    }

    fn num_frames(&self) -> usize {
        match &self.source {
            ReplaySource::Memory(f) => f.len(),
            ReplaySource::Files(f) => f.len(),
        }
    }
}

impl Sensor for ReplaySensor {
    fn update(&mut self) -> Result<(), SensorError> {
        if self.next >= self.num_frames() {
            if self.looping && self.num_frames() > 0 {
                self.next = 0;
            } else {
                return Err(SensorError::EndOfStream);
            }
        }

        self.current = match &self.source {
            ReplaySource::Memory(frames) => frames[self.next].clone(),
            ReplaySource::Files(paths) => {
                let path = &paths[self.next];
                let s = fs::read_to_string(path)?;
                serde_json::from_str(&s).map_err(|e| SensorError::Parse(path.clone(), e))?
            }
        };

        trace!(
            "Replay frame {} ({} points)",
            self.next,
            self.current.points.len()
        );

        self.next += 1;

        Ok(())
    }

    fn cloud(&self) -> &PointCloud {
        &self.current
    }

    fn set_stage(&mut self, stage: u8) {
        self.stage = stage;
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::eqpt::cloud::ColorPoint;

    fn frame(x: f64) -> PointCloud {
        PointCloud::from_points(vec![ColorPoint::new(x, 0.0, 1.0)])
    }

    #[test]
    fn test_replay_memory() {
        let mut sensor = ReplaySensor::from_frames(vec![frame(1.0), frame(2.0)]);

        sensor.update().unwrap();
        assert_eq!(sensor.cloud().points[0].position.x, 1.0);
        sensor.update().unwrap();
        assert_eq!(sensor.cloud().points[0].position.x, 2.0);

        match sensor.update() {
            Err(SensorError::EndOfStream) => (),
            r => panic!("Expected end of stream, got {:?}", r),
        }

        // Current cloud is kept after the end of the stream
        assert_eq!(sensor.cloud().points[0].position.x, 2.0);
    }

    #[test]
    fn test_replay_looping() {
        let mut sensor = ReplaySensor::from_frames(vec![frame(1.0), frame(2.0)]).looping(true);

        for _ in 0..3 {
            sensor.update().unwrap();
        }
        assert_eq!(sensor.cloud().points[0].position.x, 1.0);

        sensor.set_stage(4);
        assert_eq!(sensor.stage(), 4);
    }

    #[test]
    fn test_replay_dir() {
        let dir = std::env::temp_dir().join(format!("replay_sensor_test_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        for (i, x) in [0.5, 1.5].iter().enumerate() {
            let s = serde_json::to_string(&frame(*x)).unwrap();
            fs::write(dir.join(format!("frame_{:03}.json", i)), s).unwrap();
        }
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut sensor = ReplaySensor::from_dir(&dir).unwrap();
        sensor.update().unwrap();
        assert_eq!(sensor.cloud().points[0].position.x, 0.5);
        sensor.update().unwrap();
        assert_eq!(sensor.cloud().points[0].position.x, 1.5);
        assert!(sensor.update().is_err());

        fs::remove_dir_all(&dir).unwrap();
    }
}
