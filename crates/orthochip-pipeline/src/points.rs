//! Query point lists

use orthochip_core::error::{OrthochipError, Result};
use orthochip_core::models::{ChipSpec, TileRequest, TileState};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// One row of a query point CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPoint {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
}

fn points_error(path: &Path, reason: impl std::fmt::Display) -> OrthochipError {
    OrthochipError::ConfigInvalid {
        key: "points_path".to_string(),
        reason: format!("{}: {}", path.display(), reason),
    }
}

/// Load `id, lat, lon` rows in file order
///
/// Duplicate identifiers make the whole list invalid.
pub fn load_query_points<P: AsRef<Path>>(path: P) -> Result<Vec<QueryPoint>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| points_error(path, e))?;

    let mut points = Vec::new();
    let mut seen = HashSet::new();
    for row in reader.deserialize::<QueryPoint>() {
        let point = row.map_err(|e| points_error(path, e))?;
        if !seen.insert(point.id.clone()) {
            return Err(points_error(path, format!("duplicate identifier '{}'", point.id)));
        }
        points.push(point);
    }

    tracing::info!(path = %path.display(), points = points.len(), "Loaded query points");
    Ok(points)
}

/// Write points as an `id, lat, lon` CSV
pub fn write_query_points<P: AsRef<Path>>(path: P, points: &[QueryPoint]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| OrthochipError::Serialization(format!("{}: {}", path.display(), e)))?;
    for point in points {
        writer
            .serialize(point)
            .map_err(|e| OrthochipError::Serialization(format!("{}: {}", path.display(), e)))?;
    }
    writer.flush()?;
    Ok(())
}

/// Turn points into requests sharing `spec`
///
/// Points that fail request validation come back as failed tile states so
/// they still appear in the batch log.
pub fn build_requests(
    points: &[QueryPoint],
    spec: &Arc<ChipSpec>,
) -> (Vec<TileRequest>, Vec<TileState>) {
    let mut requests = Vec::with_capacity(points.len());
    let mut rejected = Vec::new();

    for point in points {
        match TileRequest::new(point.id.clone(), point.lon, point.lat, Arc::clone(spec)) {
            Ok(request) => requests.push(request),
            Err(err) => {
                tracing::warn!(id = %point.id, error = %err, "Rejected query point");
                let mut state = TileState::new(point.id.clone());
                state.fail(&err);
                rejected.push(state);
            }
        }
    }

    (requests, rejected)
}
