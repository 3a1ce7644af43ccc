use serde::Serialize;

/// UCE-style grade bands, best to worst. Thresholds are the 8-band
/// table used on report cards; older 5-band printouts are gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum GradeBand {
    D1,
    D2,
    C3,
    C4,
    C5,
    C6,
    P7,
    P8,
    F9,
}

impl GradeBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeBand::D1 => "D1",
            GradeBand::D2 => "D2",
            GradeBand::C3 => "C3",
            GradeBand::C4 => "C4",
            GradeBand::C5 => "C5",
            GradeBand::C6 => "C6",
            GradeBand::P7 => "P7",
            GradeBand::P8 => "P8",
            GradeBand::F9 => "F9",
        }
    }
}

/// Maps a score in [0,100] to its grade band. Scores outside the range
/// are clamped by the entry validation before they get here.
pub fn band_for_score(score: f64) -> GradeBand {
    if score >= 80.0 {
        GradeBand::D1
    } else if score >= 75.0 {
        GradeBand::D2
    } else if score >= 70.0 {
        GradeBand::C3
    } else if score >= 65.0 {
        GradeBand::C4
    } else if score >= 60.0 {
        GradeBand::C5
    } else if score >= 55.0 {
        GradeBand::C6
    } else if score >= 50.0 {
        GradeBand::P7
    } else if score >= 45.0 {
        GradeBand::P8
    } else {
        GradeBand::F9
    }
}

/// Grade label for an optional score; `None` renders as "-" (no mark).
pub fn grade_label(score: Option<f64>) -> &'static str {
    match score {
        Some(s) => band_for_score(s).as_str(),
        None => "-",
    }
}
