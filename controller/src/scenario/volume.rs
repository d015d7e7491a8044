//! Volume models
//!
//! A volume model maps a time window (seconds since the scenario started) to
//! the number of concurrent journeys that should be running.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Default lifetime of a constant volume model (5 minutes)
pub const DEFAULT_VOLUME_DURATION_SECS: f64 = 5.0 * 60.0;

/// Raised by a volume model once its scenario should stop
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Volume model is done")]
pub struct StopVolumeModel;

/// Target concurrency over time
pub trait VolumeModel: Send + Sync {
    /// Volume for the window `[start, end)`, in seconds since scenario start
    fn volume(&self, start: f64, end: f64) -> Result<u32, StopVolumeModel>;

    /// Human readable name used in logs
    fn name(&self) -> String;
}

/// Shared handle to a volume model
pub type SharedVolumeModel = Arc<dyn VolumeModel>;

impl fmt::Debug for dyn VolumeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Constant volume `n` until `duration` seconds have passed
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantVolume {
    pub volume: u32,
    pub duration: f64,
}

impl ConstantVolume {
    pub fn new(volume: u32, duration: f64) -> Self {
        Self { volume, duration }
    }
}

impl VolumeModel for ConstantVolume {
    fn volume(&self, start: f64, _end: f64) -> Result<u32, StopVolumeModel> {
        if start > self.duration {
            return Err(StopVolumeModel);
        }
        Ok(self.volume)
    }

    fn name(&self) -> String {
        format!("volume model {}", self.volume)
    }
}

/// Build a constant volume model, the way scenario modules declare their peaks
pub fn volume_model_factory(n: u32, duration: f64) -> SharedVolumeModel {
    Arc::new(ConstantVolume::new(n, duration))
}

/// Linear ramp from zero to `peak` over `ramp_up` seconds, held until `duration`
#[derive(Debug, Clone, PartialEq)]
pub struct RampVolume {
    pub peak: u32,
    pub ramp_up: f64,
    pub duration: f64,
}

impl VolumeModel for RampVolume {
    fn volume(&self, start: f64, end: f64) -> Result<u32, StopVolumeModel> {
        if start > self.duration {
            return Err(StopVolumeModel);
        }
        if self.ramp_up <= 0.0 || end >= self.ramp_up {
            return Ok(self.peak);
        }
        let fraction = (end / self.ramp_up).clamp(0.0, 1.0);
        Ok((self.peak as f64 * fraction).round() as u32)
    }

    fn name(&self) -> String {
        format!("ramp volume model {} over {}s", self.peak, self.ramp_up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_volume_until_duration() {
        let vm = volume_model_factory(10, 60.0);
        assert_eq!(vm.volume(0.0, 1.0), Ok(10));
        assert_eq!(vm.volume(59.0, 60.0), Ok(10));
        // The boundary itself is still inside the window
        assert_eq!(vm.volume(60.0, 61.0), Ok(10));
        assert_eq!(vm.volume(60.5, 61.0), Err(StopVolumeModel));
    }

    #[test]
    fn test_constant_volume_name() {
        let vm = volume_model_factory(30, DEFAULT_VOLUME_DURATION_SECS);
        assert_eq!(vm.name(), "volume model 30");
        assert_eq!(format!("{:?}", vm), "volume model 30");
    }

    #[test]
    fn test_ramp_volume() {
        let vm = RampVolume {
            peak: 100,
            ramp_up: 10.0,
            duration: 60.0,
        };
        assert_eq!(vm.volume(0.0, 0.0), Ok(0));
        assert_eq!(vm.volume(0.0, 5.0), Ok(50));
        assert_eq!(vm.volume(5.0, 10.0), Ok(100));
        assert_eq!(vm.volume(30.0, 31.0), Ok(100));
        assert!(vm.volume(61.0, 62.0).is_err());
    }
}
