//! Fallback crop scorer
//!
//! Ranks a fixed pool of crops against soil nutrients (N, P, K), rainfall and
//! humidity. Used whenever the LLM is unavailable or returns something we
//! cannot parse, so it must be deterministic: the same inputs and salt always
//! produce the same list.
//!
//! Each factor gets a fit in [0, 1]: 1.0 inside the crop's preferred range,
//! decaying linearly outside it relative to the violated bound. A mode picks
//! the weights that combine the five fits into one score.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{RecommendedCrop, SoilInputs};

pub const DEFAULT_COUNT: usize = 5;
pub const MAX_COUNT: usize = 10;

/// Preferred interval for one factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreferredRange {
    pub min: f64,
    pub max: f64,
}

const fn range(min: f64, max: f64) -> PreferredRange {
    PreferredRange { min, max }
}

impl PreferredRange {
    /// 1.0 inside the range, linear decay outside it relative to the bound.
    pub fn fit(&self, value: f64) -> f64 {
        if value < self.min {
            decay(self.min - value, self.min)
        } else if value > self.max {
            decay(value - self.max, self.max)
        } else {
            1.0
        }
    }
}

fn decay(distance: f64, bound: f64) -> f64 {
    if bound <= 0.0 {
        return 0.0;
    }
    (1.0 - distance / bound).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy)]
pub struct CropProfile {
    pub name: &'static str,
    pub n: PreferredRange,
    pub p: PreferredRange,
    pub k: PreferredRange,
    /// Seasonal rainfall, mm
    pub rainfall: PreferredRange,
    /// Relative humidity, %
    pub humidity: PreferredRange,
}

pub const CROP_POOL: [CropProfile; 12] = [
    CropProfile {
        name: "Rice",
        n: range(60.0, 100.0),
        p: range(35.0, 60.0),
        k: range(35.0, 45.0),
        rainfall: range(180.0, 300.0),
        humidity: range(75.0, 90.0),
    },
    CropProfile {
        name: "Maize",
        n: range(60.0, 100.0),
        p: range(35.0, 60.0),
        k: range(15.0, 25.0),
        rainfall: range(60.0, 110.0),
        humidity: range(55.0, 75.0),
    },
    CropProfile {
        name: "Wheat",
        n: range(80.0, 120.0),
        p: range(40.0, 60.0),
        k: range(30.0, 50.0),
        rainfall: range(50.0, 100.0),
        humidity: range(50.0, 70.0),
    },
    CropProfile {
        name: "Chickpea",
        n: range(20.0, 60.0),
        p: range(55.0, 80.0),
        k: range(75.0, 85.0),
        rainfall: range(65.0, 95.0),
        humidity: range(15.0, 25.0),
    },
    CropProfile {
        name: "Cotton",
        n: range(100.0, 140.0),
        p: range(35.0, 60.0),
        k: range(15.0, 25.0),
        rainfall: range(60.0, 110.0),
        humidity: range(75.0, 85.0),
    },
    CropProfile {
        name: "Sugarcane",
        n: range(100.0, 150.0),
        p: range(40.0, 80.0),
        k: range(40.0, 80.0),
        rainfall: range(150.0, 250.0),
        humidity: range(70.0, 85.0),
    },
    CropProfile {
        name: "Groundnut",
        n: range(20.0, 40.0),
        p: range(40.0, 60.0),
        k: range(30.0, 50.0),
        rainfall: range(50.0, 100.0),
        humidity: range(50.0, 70.0),
    },
    CropProfile {
        name: "Soybean",
        n: range(20.0, 40.0),
        p: range(60.0, 80.0),
        k: range(40.0, 60.0),
        rainfall: range(60.0, 100.0),
        humidity: range(60.0, 75.0),
    },
    CropProfile {
        name: "Pearl Millet",
        n: range(40.0, 80.0),
        p: range(20.0, 40.0),
        k: range(20.0, 40.0),
        rainfall: range(30.0, 70.0),
        humidity: range(40.0, 60.0),
    },
    CropProfile {
        name: "Banana",
        n: range(80.0, 120.0),
        p: range(70.0, 95.0),
        k: range(45.0, 55.0),
        rainfall: range(90.0, 120.0),
        humidity: range(75.0, 85.0),
    },
    CropProfile {
        name: "Tomato",
        n: range(80.0, 120.0),
        p: range(50.0, 80.0),
        k: range(50.0, 80.0),
        rainfall: range(60.0, 100.0),
        humidity: range(60.0, 80.0),
    },
    CropProfile {
        name: "Potato",
        n: range(100.0, 150.0),
        p: range(50.0, 80.0),
        k: range(80.0, 120.0),
        rainfall: range(50.0, 100.0),
        humidity: range(70.0, 85.0),
    },
];

/// Weighting profile deciding which factor dominates the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Balanced,
    Nutrients,
    Rainfall,
    Humidity,
    NpkHeavy,
    WaterStress,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub n: f64,
    pub p: f64,
    pub k: f64,
    pub rainfall: f64,
    pub humidity: f64,
}

impl Weights {
    pub fn total(&self) -> f64 {
        self.n + self.p + self.k + self.rainfall + self.humidity
    }
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::Balanced,
        Mode::Nutrients,
        Mode::Rainfall,
        Mode::Humidity,
        Mode::NpkHeavy,
        Mode::WaterStress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Balanced => "balanced",
            Mode::Nutrients => "nutrients",
            Mode::Rainfall => "rainfall",
            Mode::Humidity => "humidity",
            Mode::NpkHeavy => "npk-heavy",
            Mode::WaterStress => "water-stress",
        }
    }

    /// Each set sums to 1.
    pub fn weights(&self) -> Weights {
        let w = |n, p, k, rainfall, humidity| Weights { n, p, k, rainfall, humidity };
        match self {
            Mode::Balanced => w(0.2, 0.2, 0.2, 0.2, 0.2),
            Mode::Nutrients => w(0.25, 0.25, 0.25, 0.125, 0.125),
            Mode::Rainfall => w(0.1, 0.1, 0.1, 0.5, 0.2),
            Mode::Humidity => w(0.1, 0.1, 0.1, 0.2, 0.5),
            Mode::NpkHeavy => w(0.3, 0.3, 0.3, 0.05, 0.05),
            Mode::WaterStress => w(0.1, 0.1, 0.1, 0.4, 0.3),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Mode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = Mode::ALL.iter().map(|m| m.as_str()).collect();
                format!("Unknown mode '{}', expected one of: {}", s, known.join(", "))
            })
    }
}

/// Per-factor fits for one crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorFits {
    pub n: f64,
    pub p: f64,
    pub k: f64,
    pub rainfall: f64,
    pub humidity: f64,
}

impl FactorFits {
    fn labelled(&self) -> [(&'static str, f64); 5] {
        [
            ("nitrogen", self.n),
            ("phosphorus", self.p),
            ("potassium", self.k),
            ("rainfall", self.rainfall),
            ("humidity", self.humidity),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCrop {
    pub name: &'static str,
    pub score: f64,
    pub fits: FactorFits,
}

impl ScoredCrop {
    fn reason(&self) -> String {
        let labelled = self.fits.labelled();
        let best = labelled
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .copied()
            .unwrap_or(("nitrogen", 0.0));
        let worst = labelled
            .iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .copied()
            .unwrap_or(("nitrogen", 0.0));

        if worst.1 >= 1.0 {
            "All soil and weather factors fall inside the preferred range".to_string()
        } else {
            format!(
                "Strongest match on {} ({:.0}%), weakest on {} ({:.0}%)",
                best.0,
                best.1 * 100.0,
                worst.0,
                worst.1 * 100.0
            )
        }
    }

    pub fn to_recommended(&self) -> RecommendedCrop {
        RecommendedCrop {
            name: self.name.to_string(),
            score: (self.score * 1000.0).round() / 1000.0,
            reason: self.reason(),
        }
    }
}

pub fn score_crop(crop: &CropProfile, inputs: &SoilInputs, weights: &Weights) -> ScoredCrop {
    let fits = FactorFits {
        n: crop.n.fit(inputs.n),
        p: crop.p.fit(inputs.p),
        k: crop.k.fit(inputs.k),
        rainfall: crop.rainfall.fit(inputs.rainfall),
        humidity: crop.humidity.fit(inputs.humidity),
    };
    let score = fits.n * weights.n
        + fits.p * weights.p
        + fits.k * weights.k
        + fits.rainfall * weights.rainfall
        + fits.humidity * weights.humidity;

    ScoredCrop {
        name: crop.name,
        score,
        fits,
    }
}

/// Seed for the tie-breaking shuffle, bound to the caller and the inputs.
pub fn seed_for(user_id: &str, salt: &str, inputs: &SoilInputs, mode: Mode) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            user_id, salt, mode, inputs.n, inputs.p, inputs.k, inputs.rainfall, inputs.humidity
        )
        .as_bytes(),
    );
    let digest = hasher.finalize();
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest);
    seed
}

/// Whole pool, best first. Crops with equal scores are ordered by the
/// seeded shuffle, so the order is stable for a given seed.
pub fn rank(inputs: &SoilInputs, mode: Mode, seed: [u8; 32]) -> Vec<ScoredCrop> {
    let weights = mode.weights();
    let mut scored: Vec<ScoredCrop> = CROP_POOL
        .iter()
        .map(|crop| score_crop(crop, inputs, &weights))
        .collect();

    let mut rng = StdRng::from_seed(seed);
    scored.shuffle(&mut rng);
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

#[derive(Debug, Clone)]
pub struct FallbackQuery<'a> {
    pub user_id: &'a str,
    pub inputs: SoilInputs,
    pub mode: Mode,
    pub salt: &'a str,
    pub forget_history: bool,
    pub count: usize,
}

pub fn clamp_count(count: Option<usize>) -> usize {
    count.unwrap_or(DEFAULT_COUNT).clamp(1, MAX_COUNT)
}

/// Up to `count` crops, skipping names in `history` (compared
/// case-insensitively) unless `forget_history` is set. When filtering leaves
/// too few, the list is topped up from the full ranking.
pub fn recommend(query: &FallbackQuery<'_>, history: &HashSet<String>) -> Vec<RecommendedCrop> {
    let count = query.count.clamp(1, MAX_COUNT);
    let seed = seed_for(query.user_id, query.salt, &query.inputs, query.mode);
    let ranked = rank(&query.inputs, query.mode, seed);

    let seen: HashSet<String> = if query.forget_history {
        HashSet::new()
    } else {
        history.iter().map(|name| name.trim().to_lowercase()).collect()
    };

    let mut picked: Vec<&ScoredCrop> = ranked
        .iter()
        .filter(|crop| !seen.contains(&crop.name.to_lowercase()))
        .take(count)
        .collect();

    if picked.len() < count {
        tracing::debug!(
            "Only {} unseen crops for {}, backfilling from full ranking",
            picked.len(),
            query.user_id
        );
        for crop in &ranked {
            if picked.len() >= count {
                break;
            }
            if !picked.iter().any(|p| p.name == crop.name) {
                picked.push(crop);
            }
        }
    }

    picked.into_iter().map(ScoredCrop::to_recommended).collect()
}
