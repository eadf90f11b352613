use palette::{Hsl, IntoColor, Srgb};

use crate::analysis::standards::Category;

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Srgb<u8>> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            let rgb: Srgb = hsl.into_color();
            rgb.into_format()
        })
        .collect()
}

pub fn to_hex(color: Srgb<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", color.red, color.green, color.blue)
}

/// `#rrggbb` only; anything else is rejected.
fn parse_hex(text: &str) -> Option<Srgb<u8>> {
    let digits = text.trim().strip_prefix('#')?;
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    Some(Srgb::new(channel(0)?, channel(2)?, channel(4)?))
}

// ---------------------------------------------------------------------------
// Category colours
// ---------------------------------------------------------------------------

/// One `#rrggbb` colour per category: the pack's own colour when it is valid
/// hex, otherwise the generated palette entry at the same position.
pub fn category_colors(categories: &[Category]) -> Vec<String> {
    let palette = generate_palette(categories.len());
    categories
        .iter()
        .zip(palette)
        .map(|(category, fallback)| {
            let color = category.color.as_deref().and_then(parse_hex).unwrap_or_else(|| {
                log::debug!("category '{}' has no usable colour, using palette", category.name);
                fallback
            });
            to_hex(color)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str, color: Option<&str>) -> Category {
        Category {
            name: name.into(),
            low: 0.0,
            high: 50.0,
            color: color.map(str::to_string),
        }
    }

    #[test]
    fn palette_hues_are_distinct() {
        let colors = generate_palette(4);
        assert_eq!(colors.len(), 4);
        for (i, a) in colors.iter().enumerate() {
            for b in &colors[i + 1..] {
                assert_ne!(a, b);
            }
        }
        let red = colors[0];
        assert!(red.red > red.green && red.red > red.blue);
        assert!(generate_palette(0).is_empty());
    }

    #[test]
    fn pack_colours_win_when_valid() {
        let cats = [
            category("Good", Some("#00E400")),
            category("Moderate", Some("yellow")),
            category("Unhealthy", None),
        ];
        let colors = category_colors(&cats);
        assert_eq!(colors[0], "#00e400");
        let palette = generate_palette(3);
        assert_eq!(colors[1], to_hex(palette[1]));
        assert_eq!(colors[2], to_hex(palette[2]));
    }

    #[test]
    fn hex_parsing_is_strict() {
        assert_eq!(parse_hex("#ff7e00"), Some(Srgb::new(255, 126, 0)));
        assert!(parse_hex("ff7e00").is_none());
        assert!(parse_hex("#fff").is_none());
        assert!(parse_hex("#gggggg").is_none());
    }
}
