use std::sync::OnceLock;

use regex_lite::Regex;

use crate::model::{Ingredient, UnitSystem};

const QUANTITY: &str = r"(\d+\s+\d+\s*/\s*\d+|\d+\s*/\s*\d+|\d*\.\d+|\d+)";
const EPSILON: f64 = 1e-6;

const OUNCE_TABLE: [(f64, f64); 10] = [
    (0.25, 7.5),
    (1.0 / 3.0, 10.0),
    (0.5, 15.0),
    (2.0 / 3.0, 20.0),
    (0.75, 22.5),
    (1.0, 30.0),
    (1.5, 45.0),
    (2.0, 60.0),
    (2.5, 75.0),
    (3.0, 90.0),
];

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum VolumeUnit {
    Cup,
    Ounce,
    Tablespoon,
    Teaspoon,
}

impl VolumeUnit {
    fn pattern(self) -> &'static str {
        match self {
            Self::Cup => r"cups?",
            Self::Ounce => r"fl\.?\s*oz|oz|ounces?",
            Self::Tablespoon => r"tbsps?|tablespoons?|tbs",
            Self::Teaspoon => r"tsps?|teaspoons?",
        }
    }

    fn to_millilitres(self, value: f64) -> f64 {
        match self {
            Self::Cup => (value * 237.0).round(),
            Self::Ounce => ounces_to_millilitres(value),
            Self::Tablespoon => (value * 15.0).round(),
            Self::Teaspoon => (value * 5.0).round(),
        }
    }
}

struct UnitPattern {
    unit: VolumeUnit,
    regex: Regex,
}

// Cup is scanned first so that its output is never re-read as another unit.
fn patterns() -> &'static [UnitPattern] {
    static PATTERNS: OnceLock<Vec<UnitPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [VolumeUnit::Cup, VolumeUnit::Ounce, VolumeUnit::Tablespoon, VolumeUnit::Teaspoon]
            .into_iter()
            .filter_map(|unit| {
                let source = format!(r"(?i){QUANTITY}\s*(?:{})\b", unit.pattern());
                Regex::new(&source).ok().map(|regex| UnitPattern { unit, regex })
            })
            .collect()
    })
}

/// Convert volume measures in `measure` into `target`.
///
/// Imported measures are imperial, so an imperial target returns the input
/// untouched. Only the first occurrence of each unit kind is rewritten.
#[must_use]
pub fn convert(measure: &str, target: UnitSystem) -> String {
    if target == UnitSystem::Imperial {
        return measure.to_string();
    }

    let mut converted = measure.to_string();
    for pattern in patterns() {
        let Some(captures) = pattern.regex.captures(&converted) else {
            continue;
        };
        let (Some(whole), Some(quantity)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let Some(value) = parse_quantity(quantity.as_str()) else {
            continue;
        };
        let span = whole.range();

        let replacement = format_millilitres(pattern.unit.to_millilitres(value));
        converted.replace_range(span, &replacement);
    }
    converted
}

/// Whether [`convert`] would rewrite anything in `measure`.
#[must_use]
pub fn has_convertible_units(measure: &str) -> bool {
    patterns().iter().any(|pattern| {
        pattern
            .regex
            .captures(measure)
            .and_then(|captures| captures.get(1))
            .and_then(|quantity| parse_quantity(quantity.as_str()))
            .is_some()
    })
}

#[must_use]
pub fn convert_ingredient(ingredient: &Ingredient, target: UnitSystem) -> Ingredient {
    Ingredient {
        name: ingredient.name.clone(),
        measure: ingredient.measure.as_deref().map(|measure| convert(measure, target)),
    }
}

fn parse_quantity(raw: &str) -> Option<f64> {
    let Some((left, denominator)) = raw.split_once('/') else {
        return raw.trim().parse::<f64>().ok();
    };

    let denominator = denominator.trim().parse::<f64>().ok()?;
    if denominator.abs() < EPSILON {
        return None;
    }

    let mut parts = left.split_whitespace();
    let first = parts.next()?.parse::<f64>().ok()?;
    match parts.next() {
        Some(numerator) => {
            let numerator = numerator.parse::<f64>().ok()?;
            Some(first + numerator / denominator)
        }
        None => Some(first / denominator),
    }
}

fn ounces_to_millilitres(value: f64) -> f64 {
    if let Some((_, curated)) =
        OUNCE_TABLE.iter().find(|(ounces, _)| (ounces - value).abs() < EPSILON)
    {
        return *curated;
    }

    let millilitres = value * 30.0;
    if millilitres < 10.0 {
        (millilitres * 2.0).round() / 2.0
    } else {
        millilitres.round()
    }
}

fn format_millilitres(value: f64) -> String {
    if (value - value.trunc()).abs() < EPSILON {
        format!("{value:.0} ml")
    } else {
        format!("{value:.1} ml")
    }
}
