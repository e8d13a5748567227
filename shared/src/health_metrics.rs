//! Physiological calculations used by plan generation
//!
//! Provides BMR, TDEE and MET-based calorie burn estimates from a user's
//! profile data.
//!
//! # Design Principles
//!
//! 1. **Pure Functions**: All calculations are pure, no side effects
//! 2. **Single Formula**: Mifflin-St Jeor BMR and MET calorie burn only
//! 3. **Type Safety**: Strong typing prevents unit confusion

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Energy stored in one kilogram of body mass
pub const KCAL_PER_KG: f64 = 7700.0;

// ============================================================================
// Profile Enumerations
// ============================================================================

/// Biological sex for health calculations
/// Note: This is used for physiological calculations only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiologicalSex {
    Male,
    Female,
}

impl BiologicalSex {
    /// Sex-specific constant of the Mifflin-St Jeor equation
    pub fn bmr_offset(&self) -> f64 {
        match self {
            BiologicalSex::Male => 5.0,
            BiologicalSex::Female => -161.0,
        }
    }
}

impl FromStr for BiologicalSex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" => Ok(BiologicalSex::Male),
            "female" | "f" => Ok(BiologicalSex::Female),
            other => Err(format!("Unknown gender '{}'. Must be one of: male, female", other)),
        }
    }
}

/// Activity level for TDEE calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    /// Little or no exercise
    Sedentary,
    /// Light exercise 1-3 days/week
    Light,
    /// Moderate exercise 3-5 days/week
    #[default]
    Moderate,
    /// Hard exercise 6-7 days/week
    Active,
    /// Very hard exercise, physical job
    VeryActive,
}

impl ActivityLevel {
    pub const ALL: [ActivityLevel; 5] = [
        ActivityLevel::Sedentary,
        ActivityLevel::Light,
        ActivityLevel::Moderate,
        ActivityLevel::Active,
        ActivityLevel::VeryActive,
    ];

    /// Get the activity multiplier for TDEE calculation
    pub fn multiplier(&self) -> f64 {
        match self {
            ActivityLevel::Sedentary => 1.2,
            ActivityLevel::Light => 1.375,
            ActivityLevel::Moderate => 1.55,
            ActivityLevel::Active => 1.725,
            ActivityLevel::VeryActive => 1.9,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLevel::Sedentary => "sedentary",
            ActivityLevel::Light => "light",
            ActivityLevel::Moderate => "moderate",
            ActivityLevel::Active => "active",
            ActivityLevel::VeryActive => "very_active",
        }
    }
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityLevel {
    type Err = String;

    /// Parses the stored activity level; anything outside the five mapped
    /// levels is rejected rather than defaulted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        ActivityLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "Invalid activity level '{}'. Must be one of: {}",
                    s,
                    ActivityLevel::ALL.map(|l| l.as_str()).join(", ")
                )
            })
    }
}

/// Exercise intensity used to estimate calorie burn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Light,
    #[default]
    Moderate,
    Vigorous,
}

impl Intensity {
    /// Metabolic equivalent of task for this intensity
    pub fn met(&self) -> f64 {
        match self {
            Intensity::Light => 4.0,
            Intensity::Moderate => 8.0,
            Intensity::Vigorous => 12.0,
        }
    }
}

impl FromStr for Intensity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(Intensity::Light),
            "moderate" => Ok(Intensity::Moderate),
            "vigorous" => Ok(Intensity::Vigorous),
            other => Err(format!(
                "Invalid intensity '{}'. Must be one of: light, moderate, vigorous",
                other
            )),
        }
    }
}

// ============================================================================
// BMR and TDEE Calculations
// ============================================================================

/// Calculate Basal Metabolic Rate using Mifflin-St Jeor equation
///
/// Men: BMR = 10 × weight(kg) + 6.25 × height(cm) - 5 × age(y) + 5
/// Women: BMR = 10 × weight(kg) + 6.25 × height(cm) - 5 × age(y) - 161
pub fn calculate_bmr_mifflin(weight_kg: f64, height_cm: f64, age_years: i32, sex: BiologicalSex) -> f64 {
    10.0 * weight_kg + 6.25 * height_cm - 5.0 * age_years as f64 + sex.bmr_offset()
}

/// Calculate Total Daily Energy Expenditure
///
/// TDEE = BMR × Activity Multiplier
pub fn calculate_tdee(bmr: f64, activity_level: ActivityLevel) -> f64 {
    bmr * activity_level.multiplier()
}

/// Calories burned per hour of exercise at the given intensity
///
/// kcal/h = MET × weight(kg)
pub fn calories_per_hour(intensity: Intensity, weight_kg: f64) -> f64 {
    intensity.met() * weight_kg
}

/// Age in whole years on the given date, `None` if born after it
pub fn age_on(birth_date: NaiveDate, on: NaiveDate) -> Option<i32> {
    on.years_since(birth_date).map(|years| years as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_bmr_mifflin_reference_male() {
        // 10*70 + 6.25*175 - 5*30 + 5
        let bmr = calculate_bmr_mifflin(70.0, 175.0, 30, BiologicalSex::Male);
        assert!((bmr - 1648.75).abs() < 1e-9);

        let tdee = calculate_tdee(bmr, ActivityLevel::Moderate);
        assert!((tdee - bmr * 1.55).abs() < 1e-9);
    }

    #[test]
    fn test_bmr_mifflin_female_offset() {
        let male = calculate_bmr_mifflin(60.0, 165.0, 30, BiologicalSex::Male);
        let female = calculate_bmr_mifflin(60.0, 165.0, 30, BiologicalSex::Female);
        assert!((male - female - 166.0).abs() < 1e-9);
    }

    #[rstest]
    #[case("sedentary", 1.2)]
    #[case("light", 1.375)]
    #[case("moderate", 1.55)]
    #[case("active", 1.725)]
    #[case("very_active", 1.9)]
    #[case("Very-Active", 1.9)]
    fn test_activity_multipliers(#[case] raw: &str, #[case] expected: f64) {
        let level: ActivityLevel = raw.parse().unwrap();
        assert_eq!(level.multiplier(), expected);
    }

    #[rstest]
    #[case("couch_potato")]
    #[case("")]
    #[case("extra_active")]
    fn test_unmapped_activity_level_rejected(#[case] raw: &str) {
        assert!(raw.parse::<ActivityLevel>().is_err());
    }

    #[test]
    fn test_met_values() {
        assert_eq!(Intensity::Light.met(), 4.0);
        assert_eq!(Intensity::Moderate.met(), 8.0);
        assert_eq!(Intensity::Vigorous.met(), 12.0);
        assert_eq!(calories_per_hour(Intensity::Moderate, 70.0), 560.0);
    }

    #[test]
    fn test_age_on() {
        let dob = NaiveDate::from_ymd_opt(1990, 6, 15).unwrap();
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2020, 6, 14).unwrap()), Some(29));
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2020, 6, 15).unwrap()), Some(30));
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(1980, 1, 1).unwrap()), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: Male BMR > Female BMR (same stats)
        #[test]
        fn prop_male_bmr_higher(
            weight in 50.0f64..100.0,
            height in 160.0f64..190.0,
            age in 20i32..60
        ) {
            let bmr_male = calculate_bmr_mifflin(weight, height, age, BiologicalSex::Male);
            let bmr_female = calculate_bmr_mifflin(weight, height, age, BiologicalSex::Female);
            prop_assert!(bmr_male > bmr_female);
        }

        /// Property: TDEE > BMR (activity multiplier > 1)
        #[test]
        fn prop_tdee_greater_than_bmr(
            weight in 50.0f64..100.0,
            height in 160.0f64..190.0,
            age in 20i32..60,
            level_idx in 0usize..5
        ) {
            let bmr = calculate_bmr_mifflin(weight, height, age, BiologicalSex::Male);
            let tdee = calculate_tdee(bmr, ActivityLevel::ALL[level_idx]);
            prop_assert!(tdee > bmr);
        }
    }
}
