//! スコア → 表示色
//!
//! 観測中のスコア範囲で正規化し、暖色 → 中間色 → 寒色の2区間で線形補間する。
//! 範囲は予測が進むたびに変わるため、状態を持たない純粋関数として実装する。

use serde::{Deserialize, Serialize};

use crate::types::ScoreRange;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// 0.0 - 1.0
    pub a: f32,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// CSSの色表記（MapLibre の `fill-color` にそのまま渡せる）
    pub fn to_css(&self) -> String {
        if self.a >= 1.0 {
            format!("rgb({}, {}, {})", self.r, self.g, self.b)
        } else {
            format!("rgba({}, {}, {}, {})", self.r, self.g, self.b, self.a)
        }
    }
}

/// 低スコア側の端点
pub const WARM: Color = Color::rgb(215, 48, 39);
/// 中央
pub const NEUTRAL: Color = Color::rgb(255, 255, 191);
/// 高スコア側の端点
pub const COOL: Color = Color::rgb(69, 117, 180);
/// 未予測タイルの色。範囲内の色はすべて不透明なので区別できる
pub const SENTINEL: Color = Color::rgba(128, 128, 128, 0.35);

/// スコアを範囲内の位置 `t` (0.0 - 1.0) に正規化する
///
/// 範囲が縮退している（min == max）場合は中央の 0.5 とする。
pub fn normalize(score: f64, range: &ScoreRange) -> f64 {
    let span = range.max - range.min;
    if range.is_degenerate() || !span.is_finite() {
        return 0.5;
    }
    ((score - range.min) / span).clamp(0.0, 1.0)
}

pub fn color_for(score: Option<f64>, range: &ScoreRange) -> Color {
    match score {
        Some(score) if score.is_finite() => color_at(normalize(score, range)),
        _ => SENTINEL,
    }
}

/// 正規化済みの位置 `t` の色
pub fn color_at(t: f64) -> Color {
    let t = if t.is_nan() { 0.5 } else { t.clamp(0.0, 1.0) };
    if t < 0.5 {
        lerp(WARM, NEUTRAL, t / 0.5)
    } else {
        lerp(NEUTRAL, COOL, (t - 0.5) / 0.5)
    }
}

fn lerp(from: Color, to: Color, t: f64) -> Color {
    let channel = |a: u8, b: u8| -> u8 {
        let value = a as f64 + (b as f64 - a as f64) * t;
        value.round().clamp(0.0, 255.0) as u8
    };
    Color::rgb(channel(from.r, to.r), channel(from.g, to.g), channel(from.b, to.b))
}

/// 凡例用に範囲を等分した (スコア, 色) の組
pub fn legend_stops(range: &ScoreRange, count: usize) -> Vec<(f64, Color)> {
    match count {
        0 => Vec::new(),
        1 => {
            let mid = (range.min + range.max) / 2.0;
            vec![(mid, color_for(Some(mid), range))]
        }
        _ => (0..count)
            .map(|i| {
                let t = i as f64 / (count - 1) as f64;
                let score = range.min + (range.max - range.min) * t;
                (score, color_for(Some(score), range))
            })
            .collect(),
    }
}
