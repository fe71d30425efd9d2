//! Variance inflation factor screen for exogenous regressors.

use crate::linear_algebra::ols_fit;
use crate::math_utils::float_total_cmp;
use serde::Serialize;

/// Variance inflation factor of every column against the others (with a constant).
///
/// A column that the others explain exactly, or whose auxiliary regression
/// cannot be solved, gets an infinite VIF. A single column has VIF 1.
pub fn variance_inflation_factors(columns: &[Vec<f64>]) -> Vec<f64> {
    if columns.len() <= 1 {
        return vec![1.0; columns.len()];
    }
    let n = columns[0].len();
    (0..columns.len())
        .map(|j| {
            let mut design = vec![vec![1.0; n]];
            design.extend(
                columns
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != j)
                    .map(|(_, c)| c.clone()),
            );
            match ols_fit(&design, &columns[j]) {
                Ok(fit) if fit.r_squared < 1.0 => 1.0 / (1.0 - fit.r_squared),
                Ok(_) => f64::INFINITY,
                Err(e) => {
                    log::debug!("VIF auxiliary regression {} failed: {}", j, e);
                    f64::INFINITY
                }
            }
        })
        .collect()
}

/// A regressor removed by the screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedRegressor {
    pub name: String,
    /// VIF at the time it was dropped; `None` when infinite
    pub vif: Option<f64>,
}

/// Regressors that survived the screen, and those that did not.
#[derive(Debug, Clone, PartialEq)]
pub struct VifScreen {
    pub kept: Vec<(String, Vec<f64>)>,
    pub dropped: Vec<DroppedRegressor>,
}

/// Drop the highest-VIF regressor while any VIF exceeds `threshold` and more
/// than one regressor remains. Terminates after at most `columns.len() - 1` drops.
pub fn vif_screen(columns: Vec<(String, Vec<f64>)>, threshold: f64) -> VifScreen {
    let mut kept = columns;
    let mut dropped = Vec::new();

    while kept.len() > 1 {
        let data: Vec<Vec<f64>> = kept.iter().map(|(_, c)| c.clone()).collect();
        let vifs = variance_inflation_factors(&data);
        let Some((worst, &worst_vif)) = vifs
            .iter()
            .enumerate()
            .max_by(|a, b| float_total_cmp(a.1, b.1))
        else {
            break;
        };
        if worst_vif.is_nan() || worst_vif <= threshold {
            break;
        }
        let (name, _) = kept.remove(worst);
        log::info!("Dropping exogenous '{}' (VIF {:.2} > {:.2})", name, worst_vif, threshold);
        dropped.push(DroppedRegressor {
            name,
            vif: worst_vif.is_finite().then_some(worst_vif),
        });
    }

    VifScreen { kept, dropped }
}
