//! ロジットから予測結果への変換
//!
//! softmax 後の確率を降順に並べ、上位 k 件を百分率（小数第2位で丸め）で返します。
//! 同じ確率のクラスはインデックスの小さい方を先にします。

use crate::model::ClassLabelSet;
use crate::types::{ClassConfidence, PredictionResult};

/// 返す上位候補の数
pub const TOP_K: usize = 3;

/// 確率 → 百分率（小数第2位で丸め）
pub fn to_percentage(probability: f32) -> f64 {
    (probability as f64 * 100.0 * 100.0).round() / 100.0
}

/// 確率の合計と1との許容誤差
pub const SUM_TOLERANCE: f32 = 1e-3;

/// softmax の出力が確率分布になっているか確認する
///
/// NaN・無限大を含む場合や、合計が1から外れている場合はエラーメッセージを返します。
pub fn check_distribution(probabilities: &[f32]) -> Result<(), String> {
    if let Some(index) = probabilities.iter().position(|p| !p.is_finite()) {
        return Err(format!(
            "non-finite probability {} at class index {index}",
            probabilities[index]
        ));
    }
    if let Some(p) = probabilities.iter().find(|p| **p < 0.0 || **p > 1.0 + SUM_TOLERANCE) {
        return Err(format!("probability {p} is outside [0, 1]"));
    }
    let sum: f32 = probabilities.iter().sum();
    if (sum - 1.0).abs() > SUM_TOLERANCE {
        return Err(format!("probabilities sum to {sum}, not 1"));
    }
    Ok(())
}

/// 確率の高い順に並べたインデックス
pub fn ranked_indices(probabilities: &[f32]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..probabilities.len()).collect();
    indices.sort_by(|&a, &b| {
        probabilities[b]
            .partial_cmp(&probabilities[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    indices
}

/// 確率分布から予測結果を作る
///
/// `probabilities` の長さはラベル数と一致している必要があります。
pub fn build_prediction(
    probabilities: &[f32],
    labels: &ClassLabelSet,
    top_k: usize,
) -> Option<PredictionResult> {
    if probabilities.len() != labels.len()
        || probabilities.is_empty()
        || check_distribution(probabilities).is_err()
    {
        return None;
    }

    let top_predictions = ranked_indices(probabilities)
        .into_iter()
        .take(top_k.min(labels.len()).max(1))
        .map(|index| {
            labels.get(index).map(|label| ClassConfidence {
                class_name: label.to_string(),
                confidence: to_percentage(probabilities[index]),
            })
        })
        .collect::<Option<Vec<_>>>()?;

    let best = top_predictions.first()?;
    Some(PredictionResult {
        predicted_class: best.class_name.clone(),
        confidence: best.confidence,
        top_predictions,
    })
}
