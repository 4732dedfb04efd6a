use iptv_proto::config::RenderConfig;
use serde::Serialize;

/// Rendering strategy, chosen from the size of the full catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Every item is mounted.
    #[default]
    Direct,
    /// Only the viewport plus overscan is mounted.
    Windowed,
    /// Windowed with a tighter ceiling and a background search worker.
    Extreme,
}

/// Numbers a mode runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModePolicy {
    pub overscan: usize,
    /// Hard cap on mounted elements.
    pub ceiling: usize,
    pub recent_views: usize,
    pub use_worker: bool,
}

impl RenderMode {
    pub fn select(total: usize, config: &RenderConfig) -> Self {
        if total >= config.extreme_threshold {
            Self::Extreme
        } else if total >= config.windowed_threshold {
            Self::Windowed
        } else {
            Self::Direct
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Windowed => "windowed",
            Self::Extreme => "extreme",
        }
    }

    pub fn policy(self, config: &RenderConfig) -> ModePolicy {
        match self {
            // Direct mounts the whole catalog, which is below the windowed
            // threshold by construction.
            Self::Direct => ModePolicy {
                overscan: 0,
                ceiling: config.windowed_threshold.max(1),
                recent_views: 0,
                use_worker: false,
            },
            Self::Windowed => ModePolicy {
                overscan: config.overscan_rows,
                ceiling: config.windowed_max_render.max(1),
                recent_views: config.recent_views,
                use_worker: false,
            },
            Self::Extreme => ModePolicy {
                overscan: config.extreme_overscan_rows,
                ceiling: config.extreme_max_render.max(1),
                recent_views: config.extreme_recent_views,
                use_worker: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        let cfg = RenderConfig::default();
        assert_eq!(RenderMode::select(0, &cfg), RenderMode::Direct);
        assert_eq!(RenderMode::select(999, &cfg), RenderMode::Direct);
        assert_eq!(RenderMode::select(1_000, &cfg), RenderMode::Windowed);
        assert_eq!(RenderMode::select(14_999, &cfg), RenderMode::Windowed);
        assert_eq!(RenderMode::select(15_000, &cfg), RenderMode::Extreme);
        assert_eq!(RenderMode::select(20_000, &cfg), RenderMode::Extreme);
    }

    #[test]
    fn test_extreme_is_tighter() {
        let cfg = RenderConfig::default();
        let w = RenderMode::Windowed.policy(&cfg);
        let e = RenderMode::Extreme.policy(&cfg);
        assert!(e.ceiling < w.ceiling);
        assert!(e.overscan < w.overscan);
        assert!(e.recent_views > w.recent_views);
        assert!(e.use_worker && !w.use_worker);
    }
}
