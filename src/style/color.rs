use std::str::FromStr;

use super::Interpolate;

/// A colour stored as non-premultiplied RGBA in `0.0..=1.0`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Color { r, g, b, a }
    }

    pub fn with_alpha(&self, alpha: f32) -> Color {
        Color { a: alpha, ..*self }
    }

    pub fn alpha(&self) -> f32 {
        self.a
    }

    /// Premultiplied RGBA bytes as written into paint attribute arrays.
    pub fn to_bytes(&self) -> [u8; 4] {
        let a = self.a.clamp(0.0, 1.0);
        let channel = |v: f32| (v.clamp(0.0, 1.0) * a * 255.0).round() as u8;
        [
            channel(self.r),
            channel(self.g),
            channel(self.b),
            (a * 255.0).round() as u8,
        ]
    }

    fn from_hsla(h: f32, s: f32, l: f32, a: f32) -> Color {
        let h = h.rem_euclid(360.0);
        let s = s.clamp(0.0, 1.0);
        let l = l.clamp(0.0, 1.0);

        let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
        let h_prime = h / 60.0;
        let x = c * (1.0 - ((h_prime % 2.0) - 1.0).abs());
        let (r, g, b) = match h_prime as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        let m = l - c / 2.0;
        Color::rgba(r + m, g + m, b + m, a)
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::rgba(0.0, 0.0, 0.0, 1.0)
    }
}

impl FromStr for Color {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(hex) = s.strip_prefix('#') {
            return parse_hex(hex);
        }

        if let Some((name, args)) = s.split_once('(') {
            let args = args.strip_suffix(')').ok_or("unterminated color function")?;
            let parts = args
                .split(',')
                .map(|p| parse_number(p))
                .collect::<Option<Vec<f32>>>()
                .ok_or("invalid color component")?;

            return match (name.trim(), parts.as_slice()) {
                ("rgb", &[r, g, b]) => Ok(Color::rgba(r / 255.0, g / 255.0, b / 255.0, 1.0)),
                ("rgba", &[r, g, b, a]) => Ok(Color::rgba(r / 255.0, g / 255.0, b / 255.0, a)),
                ("hsl", &[h, s, l]) => Ok(Color::from_hsla(h, s / 100.0, l / 100.0, 1.0)),
                ("hsla", &[h, s, l, a]) => Ok(Color::from_hsla(h, s / 100.0, l / 100.0, a)),
                _ => Err("unsupported color function"),
            };
        }

        match s {
            "black" => Ok(Color::rgba(0.0, 0.0, 0.0, 1.0)),
            "white" => Ok(Color::rgba(1.0, 1.0, 1.0, 1.0)),
            "red" => Ok(Color::rgba(1.0, 0.0, 0.0, 1.0)),
            "green" => Ok(Color::rgba(0.0, 128.0 / 255.0, 0.0, 1.0)),
            "blue" => Ok(Color::rgba(0.0, 0.0, 1.0, 1.0)),
            "transparent" => Ok(Color::rgba(0.0, 0.0, 0.0, 0.0)),
            _ => Err("invalid color"),
        }
    }
}

fn parse_hex(hex: &str) -> Result<Color, &'static str> {
    let digits = hex
        .chars()
        .map(|c| c.to_digit(16).map(|d| d as f32))
        .collect::<Option<Vec<f32>>>()
        .ok_or("invalid hex color")?;

    match digits.as_slice() {
        &[r, g, b] => Ok(Color::rgba(r / 15.0, g / 15.0, b / 15.0, 1.0)),
        &[r1, r2, g1, g2, b1, b2] => Ok(Color::rgba(
            (r1 * 16.0 + r2) / 255.0,
            (g1 * 16.0 + g2) / 255.0,
            (b1 * 16.0 + b2) / 255.0,
            1.0,
        )),
        _ => Err("invalid hex color length"),
    }
}

fn parse_number(part: &str) -> Option<f32> {
    let part = part.trim();
    part.strip_suffix('%').unwrap_or(part).parse().ok()
}

impl<'de> serde::Deserialize<'de> for Color {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let s = String::deserialize(deserializer)?;
        Color::from_str(&s).map_err(D::Error::custom)
    }
}

impl Interpolate for Color {
    fn interpolate(&self, factor: f32, other: Self) -> Self {
        Color {
            r: self.r.interpolate(factor, other.r),
            g: self.g.interpolate(factor, other.g),
            b: self.b.interpolate(factor, other.b),
            a: self.a.interpolate(factor, other.a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parses_hex_and_functions() {
        assert_eq!("#fff".parse::<Color>().unwrap().to_bytes(), [255, 255, 255, 255]);
        assert_eq!("#ff8000".parse::<Color>().unwrap().to_bytes(), [255, 128, 0, 255]);
        assert_eq!(
            "rgba(255, 0, 0, 0.5)".parse::<Color>().unwrap().to_bytes(),
            [128, 0, 0, 128]
        );

        let green = "hsl(120, 100%, 50%)".parse::<Color>().unwrap();
        assert_relative_eq!(green.g, 1.0);
        assert_relative_eq!(green.r, 0.0);

        assert!("#12".parse::<Color>().is_err());
        assert!("cmyk(1,2,3,4)".parse::<Color>().is_err());
        assert_eq!("transparent".parse::<Color>().unwrap().to_bytes(), [0, 0, 0, 0]);
    }
}
