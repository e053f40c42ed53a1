//! Keyframe insertion policy.

use crate::config::KeyframePolicyConfig;

/// Decides when the current frame should be promoted to a keyframe.
///
/// A keyframe is inserted when tracking quality drops (tracked points below
/// a fraction of the reference keyframe's), when the camera has moved or
/// rotated too far since the last keyframe, or unconditionally after a hard
/// frame cap. The thresholds are policy knobs, not contracts.
pub struct KeyframePolicy {
    config: KeyframePolicyConfig,
    frames_since_kf: usize,
}

impl KeyframePolicy {
    pub fn new(config: KeyframePolicyConfig) -> Self {
        Self {
            config,
            frames_since_kf: 0,
        }
    }

    /// Evaluate the policy for one tracked frame.
    ///
    /// * `tracked_points` - inliers supporting the frame's pose
    /// * `reference_points` - map points associated in the reference keyframe
    /// * `translation_since_kf` - distance moved since the last keyframe
    /// * `rotation_since_kf_deg` - rotation since the last keyframe
    /// * `median_depth` - median depth of the tracked points, used to make
    ///   the translation bound scale-free (monocular maps have no metric
    ///   scale)
    pub fn should_insert(
        &mut self,
        tracked_points: usize,
        reference_points: usize,
        translation_since_kf: f64,
        rotation_since_kf_deg: f64,
        median_depth: f64,
    ) -> bool {
        self.frames_since_kf += 1;

        if self.frames_since_kf >= self.config.max_frames_between {
            return true;
        }

        if reference_points > 0 {
            let ratio = tracked_points as f64 / reference_points as f64;
            if ratio < self.config.min_tracked_ratio {
                return true;
            }
        }

        if median_depth > 0.0
            && translation_since_kf / median_depth > self.config.max_translation_ratio
        {
            return true;
        }

        rotation_since_kf_deg > self.config.max_rotation_deg
    }

    /// Reset after a keyframe was inserted.
    pub fn reset(&mut self) {
        self.frames_since_kf = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> KeyframePolicy {
        KeyframePolicy::new(KeyframePolicyConfig::default())
    }

    #[test]
    fn steady_tracking_inserts_nothing() {
        let mut p = policy();
        for _ in 0..10 {
            assert!(!p.should_insert(95, 100, 0.01, 0.1, 5.0));
        }
    }

    #[test]
    fn tracked_ratio_drop_triggers_insertion() {
        let mut p = policy();
        assert!(p.should_insert(40, 100, 0.0, 0.0, 5.0));
    }

    #[test]
    fn large_motion_triggers_insertion() {
        let mut p = policy();
        // 1.0 of translation at median depth 5.0 is a 20% ratio.
        assert!(p.should_insert(95, 100, 1.0, 0.0, 5.0));

        p.reset();
        assert!(p.should_insert(95, 100, 0.0, 15.0, 5.0));
    }

    #[test]
    fn frame_cap_forces_insertion() {
        let config = KeyframePolicyConfig {
            max_frames_between: 3,
            ..KeyframePolicyConfig::default()
        };
        let mut p = KeyframePolicy::new(config);
        assert!(!p.should_insert(100, 100, 0.0, 0.0, 5.0));
        assert!(!p.should_insert(100, 100, 0.0, 0.0, 5.0));
        assert!(p.should_insert(100, 100, 0.0, 0.0, 5.0));
    }
}
