use serde::{Deserialize, Serialize};

/// School grade levels, ordered from pre-kindergarten through twelfth grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    PreK,
    K,
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    Sixth,
    Seventh,
    Eighth,
    Ninth,
    Tenth,
    Eleventh,
    Twelfth,
}

impl Grade {
    /// Every grade in ascending order
    pub const ALL: [Grade; 14] = [
        Grade::PreK,
        Grade::K,
        Grade::First,
        Grade::Second,
        Grade::Third,
        Grade::Fourth,
        Grade::Fifth,
        Grade::Sixth,
        Grade::Seventh,
        Grade::Eighth,
        Grade::Ninth,
        Grade::Tenth,
        Grade::Eleventh,
        Grade::Twelfth,
    ];

    /// Position of the grade in the ordering (PreK = 0)
    #[inline]
    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Grade a person of the given age attends, `None` if not school aged
    pub fn for_age(age: u8) -> Option<Grade> {
        match age {
            3 | 4 => Some(Grade::PreK),
            5..=17 => Grade::ALL.get(usize::from(age) - 4).copied(),
            _ => None,
        }
    }

    /// All grades between `lower` and `upper` inclusive; empty when `lower > upper`
    pub fn range(lower: Grade, upper: Grade) -> Vec<Grade> {
        GradeRange::new(lower, upper)
            .map(|range| range.iter().collect())
            .unwrap_or_default()
    }

    /// Map a textual grade name from the public school registry.
    pub fn from_name(name: &str) -> Option<Grade> {
        match name.trim().to_lowercase().as_str() {
            "prekindergarten" => Some(Grade::PreK),
            "kindergarten" | "transitional kindergarten" => Some(Grade::K),
            "1st grade" => Some(Grade::First),
            "2nd grade" => Some(Grade::Second),
            "3rd grade" => Some(Grade::Third),
            "4th grade" => Some(Grade::Fourth),
            "5th grade" => Some(Grade::Fifth),
            "6th grade" => Some(Grade::Sixth),
            "7th grade" => Some(Grade::Seventh),
            "8th grade" => Some(Grade::Eighth),
            "9th grade" => Some(Grade::Ninth),
            "10th grade" => Some(Grade::Tenth),
            "11th grade" => Some(Grade::Eleventh),
            "12th grade" => Some(Grade::Twelfth),
            _ => None,
        }
    }

    /// Map a numeric grade code from the private school registry.
    ///
    /// Codes 4 (transitional kindergarten) and 5 (transitional first grade)
    /// fold into their regular grade.
    pub fn from_code(code: i64) -> Option<Grade> {
        match code {
            2 => Some(Grade::PreK),
            3 | 4 => Some(Grade::K),
            5 | 6 => Some(Grade::First),
            7..=17 => usize::try_from(code - 4)
                .ok()
                .and_then(|idx| Grade::ALL.get(idx).copied()),
            _ => None,
        }
    }
}

/// Closed range of grades offered by a school
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GradeRange {
    lower: Grade,
    upper: Grade,
    #[serde(skip)]
    mask: u16,
}

impl GradeRange {
    /// Build a range, `None` if `lower > upper`
    pub fn new(lower: Grade, upper: Grade) -> Option<Self> {
        if lower > upper {
            return None;
        }

        let mask = (lower.ordinal()..=upper.ordinal()).fold(0u16, |mask, idx| mask | (1 << idx));

        Some(Self { lower, upper, mask })
    }

    pub fn lower(&self) -> Grade {
        self.lower
    }

    pub fn upper(&self) -> Grade {
        self.upper
    }

    /// O(1) membership test
    #[inline]
    pub fn contains(&self, grade: Grade) -> bool {
        self.mask & (1 << grade.ordinal()) != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Grade> + '_ {
        Grade::ALL.iter().copied().filter(move |grade| self.contains(*grade))
    }

    pub fn len(&self) -> usize {
        self.mask.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }
}
