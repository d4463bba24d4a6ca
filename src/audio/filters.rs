//! Audio filter catalogue.
//!
//! Filters are addressed by number in universal markup (`{4}` = pitch down).
//! Most map to a single ffmpeg `-af` chain; reverbs and ambiences mix the
//! clip with a file from the background directory.

use std::collections::HashMap;
use std::time::Duration;

/// Most times one filter may appear in a single chain.
pub const MAX_PER_FILTER: usize = 3;
/// Longest chain applied to one clip.
pub const MAX_FILTERS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FilterKind {
    RoomEcho = 1,
    HallEcho,
    OutsideEcho,
    PitchDown,
    PitchUp,
    Telephone,
    Muffled,
    Quiet,
    Ghost,
    Chorus,
    Slower,
    Faster,
    RightSide,
    LeftSide,
    LeftToRight,
    RightToLeft,
    QuietToLoud,
    LoudToQuiet,
    Bog,
    Keyboard,
    Typewriter,
    Writing,
    Iphone,
    Cave,
    Hospital,
    Windy,
    Clock,
    Crackles,
    Crickets,
    Birds,
    Lava,
}

const ALL: [FilterKind; 31] = [
    FilterKind::RoomEcho,
    FilterKind::HallEcho,
    FilterKind::OutsideEcho,
    FilterKind::PitchDown,
    FilterKind::PitchUp,
    FilterKind::Telephone,
    FilterKind::Muffled,
    FilterKind::Quiet,
    FilterKind::Ghost,
    FilterKind::Chorus,
    FilterKind::Slower,
    FilterKind::Faster,
    FilterKind::RightSide,
    FilterKind::LeftSide,
    FilterKind::LeftToRight,
    FilterKind::RightToLeft,
    FilterKind::QuietToLoud,
    FilterKind::LoudToQuiet,
    FilterKind::Bog,
    FilterKind::Keyboard,
    FilterKind::Typewriter,
    FilterKind::Writing,
    FilterKind::Iphone,
    FilterKind::Cave,
    FilterKind::Hospital,
    FilterKind::Windy,
    FilterKind::Clock,
    FilterKind::Crackles,
    FilterKind::Crickets,
    FilterKind::Birds,
    FilterKind::Lava,
];

/// How a filter is realised with ffmpeg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterPlan {
    /// A plain `-af` chain.
    Chain(String),
    /// Convolve with an impulse response file.
    Reverb { file: &'static str, ghost: bool },
    /// Mix with a looping background file.
    Background { file: &'static str },
}

impl FilterKind {
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    /// Parse the numeric token used in markup.
    pub fn from_name(name: &str) -> Option<Self> {
        name.trim().parse::<u8>().ok().and_then(Self::from_number)
    }

    /// Left/right placement filters; only one may apply to a clip.
    pub fn is_spatial(self) -> bool {
        matches!(
            self,
            FilterKind::RightSide
                | FilterKind::LeftSide
                | FilterKind::LeftToRight
                | FilterKind::RightToLeft
        )
    }

    /// Whether the chain depends on the clip length.
    pub fn needs_duration(self) -> bool {
        matches!(
            self,
            FilterKind::LeftToRight
                | FilterKind::RightToLeft
                | FilterKind::QuietToLoud
                | FilterKind::LoudToQuiet
        )
    }

    pub fn plan(self, duration: Duration) -> FilterPlan {
        use FilterKind::*;

        let secs = duration.as_secs_f64();
        let chain = |s: &str| FilterPlan::Chain(s.to_string());

        match self {
            RoomEcho => FilterPlan::Reverb {
                file: "church_small.wav",
                ghost: false,
            },
            HallEcho => FilterPlan::Reverb {
                file: "church.wav",
                ghost: false,
            },
            Ghost => FilterPlan::Reverb {
                file: "church.wav",
                ghost: true,
            },
            OutsideEcho => chain("aecho=0.8:0.8:0.850000:0.840000"),
            PitchDown => chain("rubberband=pitch=0.580000"),
            PitchUp => chain("rubberband=pitch=1.760000"),
            Telephone => chain("highpass=f=1000,lowpass=f=3000"),
            Muffled => chain("lowpass=f=700"),
            Quiet => chain("volume=0.300000"),
            Chorus => chain(
                "chorus=0.7:0.9:40|45|50|60|70|80:0.3|0.25|0.4|0.3|0.4|0.25:0.5|0.6|0.7|0.8|0.9|1:10|11|12|9|8|10",
            ),
            Slower => chain("atempo=0.610000"),
            Faster => chain("atempo=1.760000"),
            RightSide => chain("pan=stereo|c0=0*c0|c1=1*c0"),
            LeftSide => chain("pan=stereo|c0=1*c0|c1=0*c0"),
            LeftToRight => FilterPlan::Chain(format!(
                "apulsator=hz={:.6}:offset_l=0.25:offset_r=0.75",
                sweep_hz(secs)
            )),
            RightToLeft => FilterPlan::Chain(format!(
                "apulsator=hz={:.6}:offset_l=0.75:offset_r=0.25",
                sweep_hz(secs)
            )),
            QuietToLoud => FilterPlan::Chain(format!("volume='0.1+0.9*t/{secs:.1}':eval=frame")),
            LoudToQuiet => FilterPlan::Chain(format!("volume='1.0-0.9*t/{secs:.1}':eval=frame")),
            Bog => chain("rubberband=pitch=1.5,chorus=0.7:0.9:55:0.4:0.25:2"),
            Cave => chain("aecho=0.8:0.8:0.97:0.94"),
            Keyboard => FilterPlan::Background { file: "keyboard.mp3" },
            Typewriter => FilterPlan::Background {
                file: "typewriter.mp3",
            },
            Writing => FilterPlan::Background { file: "writing.mp3" },
            Iphone => FilterPlan::Background { file: "iphone.mp3" },
            Hospital => FilterPlan::Background {
                file: "hospital.mp3",
            },
            Windy => FilterPlan::Background { file: "windy.mp3" },
            Clock => FilterPlan::Background { file: "clock.mp3" },
            Crackles => FilterPlan::Background {
                file: "crackles.mp3",
            },
            Crickets => FilterPlan::Background {
                file: "crickets.mp3",
            },
            Birds => FilterPlan::Background { file: "birds.mp3" },
            Lava => FilterPlan::Background { file: "lava.mp3" },
        }
    }
}

/// One half-cycle of the pulsator across the whole clip.
fn sweep_hz(secs: f64) -> f64 {
    if secs > 0.0 {
        0.5 / secs
    } else {
        0.5
    }
}

/// Cap a filter chain before it reaches ffmpeg: at most
/// [`MAX_PER_FILTER`] uses of one filter, at most [`MAX_FILTERS`] in total,
/// and a single spatial filter.
pub fn limit_filters(filters: &[String]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut spatial_used = false;
    let mut limited = Vec::new();

    for filter in filters {
        let spatial = FilterKind::from_name(filter).is_some_and(FilterKind::is_spatial);
        if spatial && spatial_used {
            continue;
        }

        let count = counts.entry(filter.as_str()).or_default();
        if *count >= MAX_PER_FILTER {
            continue;
        }
        *count += 1;
        spatial_used |= spatial;

        limited.push(filter.clone());
        if limited.len() >= MAX_FILTERS {
            break;
        }
    }

    limited
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn numbering_is_one_based_and_closed() {
        assert_eq!(FilterKind::from_name("1"), Some(FilterKind::RoomEcho));
        assert_eq!(FilterKind::from_name("24"), Some(FilterKind::Cave));
        assert_eq!(FilterKind::from_name("31"), Some(FilterKind::Lava));
        assert_eq!(FilterKind::from_name("0"), None);
        assert_eq!(FilterKind::from_name("32"), None);
        assert_eq!(FilterKind::from_name("x"), None);
        for (i, kind) in ALL.iter().enumerate() {
            assert_eq!(usize::from(kind.number()), i + 1);
        }
    }

    #[test]
    fn plain_chains() {
        assert_eq!(
            FilterKind::Telephone.plan(Duration::ZERO),
            FilterPlan::Chain("highpass=f=1000,lowpass=f=3000".into())
        );
        assert_eq!(
            FilterKind::PitchDown.plan(Duration::ZERO),
            FilterPlan::Chain("rubberband=pitch=0.580000".into())
        );
    }

    #[test]
    fn duration_dependent_chains() {
        let plan = FilterKind::LeftToRight.plan(Duration::from_secs(2));
        assert_eq!(
            plan,
            FilterPlan::Chain("apulsator=hz=0.250000:offset_l=0.25:offset_r=0.75".into())
        );
        let plan = FilterKind::QuietToLoud.plan(Duration::from_secs(4));
        assert_eq!(
            plan,
            FilterPlan::Chain("volume='0.1+0.9*t/4.0':eval=frame".into())
        );
    }

    #[test]
    fn mixes_use_files() {
        assert!(matches!(
            FilterKind::Ghost.plan(Duration::ZERO),
            FilterPlan::Reverb { ghost: true, .. }
        ));
        assert_eq!(
            FilterKind::Birds.plan(Duration::ZERO),
            FilterPlan::Background { file: "birds.mp3" }
        );
    }

    #[test]
    fn limit_caps_repeats() {
        let limited = limit_filters(&names(&["4", "4", "4", "4", "5"]));
        assert_eq!(limited, names(&["4", "4", "4", "5"]));
    }

    #[test]
    fn limit_allows_one_spatial() {
        let limited = limit_filters(&names(&["13", "14", "4", "15", "16"]));
        assert_eq!(limited, names(&["13", "4"]));
    }

    #[test]
    fn limit_caps_total() {
        let many: Vec<String> = (1..=12)
            .filter(|n| !(13..=16).contains(n))
            .flat_map(|n| vec![n.to_string(), n.to_string()])
            .collect();
        assert_eq!(limit_filters(&many).len(), MAX_FILTERS);
    }

    #[test]
    fn limit_empty() {
        assert!(limit_filters(&[]).is_empty());
    }
}
