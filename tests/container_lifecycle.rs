use std::fs;
use std::path::Path;

use tempfile::TempDir;

use bds::format::{
    Format, FormatRegistry, ParameterKind, ParameterSpec, ParameterValue, SchemaFormat, Version,
    COMPUTE_FILE_CHECKSUMS,
};
use bds::handler::ChecksumMismatch;
use bds::metadata::{
    DataSet, ExperimentIdentifier, ExperimentRegistrationTimestamp, ExperimentRegistrator, Sample,
};
use bds::structure::{DataStructure, DataStructureConfig, DataStructureError, MandatoryItem};

fn config() -> DataStructureConfig {
    let tiff_stack = SchemaFormat::new(
        Format::new("tiff-stack", Version::new(1, 0)),
        vec![ParameterSpec::new("channel-count", ParameterKind::Integer)],
    );
    DataStructureConfig::new().registry(FormatRegistry::new().with(tiff_stack))
}

fn write_inputs(dir: &Path) -> Vec<std::path::PathBuf> {
    ["well-a1.tiff", "well-a2.tiff", "well-b1.tiff"]
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let path = dir.join(name);
            fs::write(&path, format!("image {}", i)).unwrap();
            path
        })
        .collect()
}

fn create_container(root: &Path, inputs: &Path) -> ExperimentRegistrationTimestamp {
    let mut handle = DataStructure::on_filesystem(root, config())
        .unwrap()
        .create()
        .unwrap();
    handle
        .set_format(Format::new("tiff-stack", Version::new(1, 0)))
        .unwrap();
    handle
        .add_format_parameter(COMPUTE_FILE_CHECKSUMS, "true")
        .unwrap();
    handle.add_format_parameter("channel-count", "3").unwrap();

    let original = handle.original_data().unwrap();
    for source in write_inputs(inputs) {
        original.add_file(&source, None, false).unwrap();
    }

    handle
        .set_sample(&Sample::new("PLATE-42", "PLATE", "384 well plate"))
        .unwrap();
    handle
        .set_experiment_identifier(&ExperimentIdentifier::new("DB", "LAB", "SCREEN", "EXP-7"))
        .unwrap();
    let registered = ExperimentRegistrationTimestamp::now();
    handle
        .set_experiment_registration_timestamp(&registered)
        .unwrap();
    handle
        .set_experiment_registrator(&ExperimentRegistrator::new("Ada", "Lovelace", "ada@example.org"))
        .unwrap();
    handle
        .set_data_set(&DataSet::new("DS-42", "HCS_IMAGE"))
        .unwrap();
    handle.close().unwrap();
    registered
}

#[test]
fn test_create_then_open_read_only() {
    let root = TempDir::new().unwrap();
    let inputs = TempDir::new().unwrap();
    let registered = create_container(root.path(), inputs.path());

    let handle = DataStructure::on_filesystem(root.path(), config())
        .unwrap()
        .open_read_only(true)
        .unwrap();
    assert_eq!(handle.experiment_registration_timestamp().unwrap(), registered);

    assert_eq!(handle.format().unwrap().code(), "tiff-stack");
    assert_eq!(
        handle.format_parameters().get("channel-count"),
        Some(&ParameterValue::Integer(3))
    );
    assert!(handle.format_parameters().compute_file_checksums());
    assert_eq!(handle.sample().unwrap().code, "PLATE-42");
    assert_eq!(handle.experiment_identifier().unwrap().to_string(), "DB:/LAB/SCREEN/EXP-7");

    let original = handle.original_data().unwrap();
    let files = original.list_files(None, true).unwrap();
    assert_eq!(files.len(), 3);
    assert_eq!(files[0].read_string().unwrap(), "image 0");
    assert!(handle.references().is_empty());

    let err = original.make_directory("x").unwrap_err();
    assert!(err.is_access_denied());
    assert!(handle.verify_checksums().unwrap().is_empty());
    handle.close().unwrap();

    // sources are copied, not moved
    assert_eq!(fs::read_dir(inputs.path()).unwrap().count(), 3);
}

#[test]
fn test_modified_payload_is_detected() {
    let root = TempDir::new().unwrap();
    let inputs = TempDir::new().unwrap();
    create_container(root.path(), inputs.path());

    let stored = root.path().join("data").join("original").join("well-a2.tiff");
    fs::write(&stored, "tampered").unwrap();
    fs::remove_file(root.path().join("data").join("original").join("well-b1.tiff")).unwrap();

    let handle = DataStructure::on_filesystem(root.path(), config())
        .unwrap()
        .open_read_only(false)
        .unwrap();
    let mismatches = handle.verify_checksums().unwrap();
    assert_eq!(
        mismatches,
        vec![
            ChecksumMismatch::Modified("well-a2.tiff".to_string()),
            ChecksumMismatch::Missing("well-b1.tiff".to_string()),
        ]
    );
    handle.close().unwrap();
}

#[test]
fn test_incomplete_container_fails_validation() {
    let root = TempDir::new().unwrap();
    let mut handle = DataStructure::on_filesystem(root.path(), config())
        .unwrap()
        .create()
        .unwrap();
    handle
        .set_format(Format::new("tiff-stack", Version::new(1, 0)))
        .unwrap();
    handle.close().unwrap();

    let err = DataStructure::on_filesystem(root.path(), config())
        .unwrap()
        .open_read_only(true)
        .unwrap_err();
    assert!(matches!(
        err,
        DataStructureError::MissingMandatory(MandatoryItem::ExperimentIdentifier)
    ));

    let handle = DataStructure::on_filesystem(root.path(), config())
        .unwrap()
        .open_read_only(false)
        .unwrap();
    assert!(handle.try_sample().unwrap().is_none());
    handle.close().unwrap();
}
