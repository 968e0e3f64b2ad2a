//! JSON persistence of estimates, chains and neighbourhood sweeps.
//!
//! Floats are written in their shortest round-trip form and parsed back exactly, so a saved
//! estimate or chain reloads bit for bit.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::identifiability::NeighbourhoodGrid;
use crate::mcmc::Chain;
use crate::optim::ModeEstimate;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to (de)serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Inconsistent file contents: {0}")]
    Mismatch(String),
}

/// Saves a mode estimate as pretty-printed JSON.
///
/// # Arguments
///
/// * `path` - Destination file, created or truncated
/// * `estimate` - The estimate to write
pub fn save_estimate(path: impl AsRef<Path>, estimate: &ModeEstimate) -> Result<(), PersistError> {
    write_json(path.as_ref(), estimate)
}

/// Loads a mode estimate written by [`save_estimate`].
///
/// # Errors
///
/// * `PersistError::Io` - If the file cannot be opened
/// * `PersistError::Json` - If the contents are not a valid estimate
/// * `PersistError::Mismatch` - If vector and matrix shapes disagree with the parameter names
pub fn load_estimate(path: impl AsRef<Path>) -> Result<ModeEstimate, PersistError> {
    let estimate: ModeEstimate = read_json(path.as_ref())?;
    estimate
        .validate()
        .map_err(|e| PersistError::Mismatch(e.to_string()))?;
    Ok(estimate)
}

pub fn save_chain(path: impl AsRef<Path>, chain: &Chain) -> Result<(), PersistError> {
    write_json(path.as_ref(), chain)
}

/// Loads a chain written by [`save_chain`], checking its shape.
pub fn load_chain(path: impl AsRef<Path>) -> Result<Chain, PersistError> {
    let chain: Chain = read_json(path.as_ref())?;
    Chain::new(
        chain.names().to_vec(),
        chain.draws().clone(),
        chain.log_posterior().clone(),
    )
    .map_err(|e| PersistError::Mismatch(e.to_string()))
}

pub fn save_neighbourhood(
    path: impl AsRef<Path>,
    grid: &NeighbourhoodGrid,
) -> Result<(), PersistError> {
    write_json(path.as_ref(), grid)
}

pub fn load_neighbourhood(path: impl AsRef<Path>) -> Result<NeighbourhoodGrid, PersistError> {
    read_json(path.as_ref())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Serde helper writing non-finite floats as `null` and reading `null` back as `NaN`.
pub(crate) mod nullable_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Like [`nullable_f64`] for a whole vector, written as a plain JSON list.
pub(crate) mod nullable_array {
    use ndarray::Array1;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &Array1<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        let values: Vec<Option<f64>> = values
            .iter()
            .map(|v| v.is_finite().then_some(*v))
            .collect();
        values.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Array1<f64>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

/// Map of named floats where non-finite values are written as `null`.
pub(crate) mod nullable_map {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        values: &BTreeMap<String, f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let values: BTreeMap<&String, Option<f64>> = values
            .iter()
            .map(|(k, v)| (k, v.is_finite().then_some(*v)))
            .collect();
        values.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, f64>, D::Error> {
        let values = BTreeMap::<String, Option<f64>>::deserialize(deserializer)?;
        Ok(values
            .into_iter()
            .map(|(k, v)| (k, v.unwrap_or(f64::NAN)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;

    #[test]
    fn test_chain_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        let chain = Chain::new(
            vec!["a".into()],
            array![[0.1 + 0.2], [1.0 / 3.0], [-2.5e-300]],
            array![-1.234_567_890_123_456_7, f64::NEG_INFINITY, 0.0],
        )
        .unwrap();

        save_chain(&path, &chain).unwrap();
        let loaded = load_chain(&path).unwrap();

        for (a, b) in chain.draws().iter().zip(loaded.draws().iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(
            loaded.log_posterior()[0].to_bits(),
            chain.log_posterior()[0].to_bits()
        );
        assert!(loaded.log_posterior()[1].is_nan());
    }

    #[test]
    fn test_malformed_chain_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        let mut file = File::create(&path).unwrap();
        write!(
            file,
            r#"{{"names":["a"],"draws":{{"v":1,"dim":[2,1],"data":[1.0,2.0]}},"log_posterior":[0.0]}}"#
        )
        .unwrap();

        assert!(matches!(load_chain(&path), Err(PersistError::Mismatch(_))));
        assert!(matches!(
            load_chain(dir.path().join("missing.json")),
            Err(PersistError::Io(_))
        ));
    }
}
