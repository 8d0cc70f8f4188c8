//! RGBから粗い色名への固定の判定表
//!
//! しきい値は設計上の定数で、実行時に変更できません。
//! 上から順に評価し、最初に一致した色名を採用します。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 粗い色名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorName {
    White,
    Black,
    Red,
    Green,
    Blue,
    Yellow,
    Purple,
    Cyan,
    Orange,
    Gray,
    Mixed,
}

impl ColorName {
    pub fn from_rgb([r, g, b]: [u8; 3]) -> Self {
        if r > 200 && g > 200 && b > 200 {
            Self::White
        } else if r < 50 && g < 50 && b < 50 {
            Self::Black
        } else if r > 150 && g < 100 && b < 100 {
            Self::Red
        } else if r < 100 && g > 150 && b < 100 {
            Self::Green
        } else if r < 100 && g < 100 && b > 150 {
            Self::Blue
        } else if r > 150 && g > 150 && b < 100 {
            Self::Yellow
        } else if r > 150 && g < 100 && b > 150 {
            Self::Purple
        } else if r < 150 && g > 150 && b > 150 {
            Self::Cyan
        } else if r > 150 && g > 100 && b < 100 {
            Self::Orange
        } else if r > 100 && g > 100 && b > 100 {
            Self::Gray
        } else {
            Self::Mixed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::White => "White",
            Self::Black => "Black",
            Self::Red => "Red",
            Self::Green => "Green",
            Self::Blue => "Blue",
            Self::Yellow => "Yellow",
            Self::Purple => "Purple",
            Self::Cyan => "Cyan",
            Self::Orange => "Orange",
            Self::Gray => "Gray",
            Self::Mixed => "Mixed",
        }
    }
}

impl fmt::Display for ColorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
