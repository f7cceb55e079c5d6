use std::io::Write;
use std::rc::Rc;

use tempfile::NamedTempFile;

use hprof_analyzer::capture::{ClassMirror, DumpBuilder, Obj, PrimitiveValues, Value};
use hprof_analyzer::format::IdSize;
use hprof_analyzer::parse_dump;
use hprof_analyzer::progress::{CancelFlag, Outcome, Silent};
use hprof_analyzer::remap::IdRemapper;
use hprof_analyzer::report::ReportOptions;
use hprof_analyzer::storage::StorageBacking;
use hprof_analyzer::types::{FieldType, HeapDumpError};
use hprof_analyzer::{ReportFormat, analyze_dump};

fn write_dump(bytes: &[u8]) -> NamedTempFile {
    let mut tmp = NamedTempFile::new().expect("Failed to create temp dump file");
    tmp.write_all(bytes).expect("Failed to write dump");
    tmp.flush().expect("Failed to flush dump");
    tmp
}

/// A holds two references to one TestString("x"); B exists but is not
/// reachable from any root; A is an Unknown root.
fn capture_test_string_scenario() -> Vec<u8> {
    let string_class = ClassMirror::new("TestString", &[("value", FieldType::Object)]);
    let a_class = ClassMirror::new(
        "A",
        &[("first", FieldType::Object), ("second", FieldType::Object)],
    );
    let b_class = ClassMirror::new("B", &[("payload", FieldType::Object)]);

    let text = Obj::primitive_array(PrimitiveValues::Byte(b"x".iter().map(|&b| b as i8).collect()));
    let string = Obj::instance(&string_class);
    string.set_field("value", Value::Ref(Some(Rc::clone(&text))));

    let a = Obj::instance(&a_class);
    a.set_field("first", Value::Ref(Some(Rc::clone(&string))));
    a.set_field("second", Value::Ref(Some(Rc::clone(&string))));

    let b = Obj::instance(&b_class);

    let mut builder =
        DumpBuilder::new(Vec::new(), IdSize::Eight, 1234).expect("Failed to create builder");
    builder.add_root_unknown(&a).expect("Failed to add root");
    builder.add_object(Some(&b)).expect("Failed to add B");
    builder.finish().expect("Failed to finish dump")
}

#[test]
fn test_round_trip_classes_and_fields() {
    let base = ClassMirror::new("Base", &[("id", FieldType::Long)]);
    let derived = ClassMirror::with_super(
        "Derived",
        Some(&base),
        &[("name", FieldType::Object), ("flag", FieldType::Bool)],
    );

    let obj = Obj::instance(&derived);
    let mut builder = DumpBuilder::new(Vec::new(), IdSize::Eight, 0).unwrap();
    builder.add_root_unknown(&obj).unwrap();
    let bytes = builder.finish().unwrap();

    let tmp = write_dump(&bytes);
    let dump = parse_dump(tmp.path(), &Silent)
        .expect("Parse failed")
        .completed()
        .expect("Parse was cancelled");

    assert_eq!(dump.classes.len(), 2, "Expected exactly Base and Derived");

    let derived_def = dump.classes.get_by_name("Derived").expect("Derived missing");
    let field_names: Vec<&str> = derived_def
        .fields
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    // Flattened field walk: own declared fields first, then the superclass.
    assert_eq!(field_names, vec!["name", "flag", "id"]);
    assert_eq!(derived_def.fields[0].ty, FieldType::Object);
    assert_eq!(derived_def.fields[1].ty, FieldType::Bool);
    assert_eq!(derived_def.fields[2].ty, FieldType::Long);
    assert_eq!(derived_def.instance_size, 8 + 1 + 8);

    let base_def = dump.classes.get_by_name("Base").expect("Base missing");
    assert_eq!(base_def.fields.len(), 1);
    assert_eq!(base_def.fields[0].name, "id");
}

#[test]
fn test_identity_dedup_across_two_paths() {
    let leaf_class = ClassMirror::new("Leaf", &[]);
    let holder_class = ClassMirror::new(
        "Holder",
        &[("left", FieldType::Object), ("right", FieldType::Object)],
    );

    let shared = Obj::instance(&leaf_class);
    let holder = Obj::instance(&holder_class);
    holder.set_field("left", Value::Ref(Some(Rc::clone(&shared))));
    holder.set_field("right", Value::Ref(Some(Rc::clone(&shared))));

    let mut builder = DumpBuilder::new(Vec::new(), IdSize::Eight, 0).unwrap();
    builder.add_root_unknown(&holder).unwrap();
    let bytes = builder.finish().unwrap();

    let tmp = write_dump(&bytes);
    let dump = parse_dump(tmp.path(), &Silent)
        .unwrap()
        .completed()
        .unwrap();

    // One Leaf record, one Holder record. Two paths, one id.
    assert_eq!(dump.objects.len(), 2, "Shared object was emitted twice");
}

#[test]
fn test_root_reason_multiset_and_rebuild_stability() {
    let class = ClassMirror::new("Pinned", &[]);
    let obj = Obj::instance(&class);

    let capture = || {
        let mut builder = DumpBuilder::new(Vec::new(), IdSize::Eight, 0).unwrap();
        builder.add_root_global_jni(&obj).unwrap();
        builder.add_root_global_jni(&obj).unwrap();
        builder.add_root_unknown(&obj).unwrap();
        builder.add_root_java_frame(&obj, 7, 0).unwrap();
        builder.finish().unwrap()
    };
    let bytes = capture();

    let tmp = write_dump(&bytes);
    let dump = parse_dump(tmp.path(), &Silent)
        .unwrap()
        .completed()
        .unwrap();

    let mut labels: Vec<&str> = dump.roots.iter().map(|r| r.reason.label()).collect();
    labels.sort();
    assert_eq!(
        labels,
        vec!["global JNI", "global JNI", "java frame", "unknown"]
    );
    // All four records point at the single Pinned instance.
    assert!(dump.roots.iter().all(|r| r.object_id == dump.roots[0].object_id));

    // The same capture sequence reproduces the dump byte for byte.
    assert_eq!(bytes, capture(), "Rebuilt dump differs");
}

#[test]
fn test_histogram_counts_k_instances() {
    let class = ClassMirror::new(
        "Sample",
        &[("a", FieldType::Int), ("b", FieldType::Double)],
    );
    let k = 17;

    let mut builder = DumpBuilder::new(Vec::new(), IdSize::Eight, 0).unwrap();
    for _ in 0..k {
        builder.add_root_unknown(&Obj::instance(&class)).unwrap();
    }
    let bytes = builder.finish().unwrap();

    let tmp = write_dump(&bytes);
    let report = analyze_dump(
        tmp.path(),
        &ReportOptions::default(),
        ReportFormat::Text,
        StorageBacking::Memory,
        &Silent,
    )
    .expect("Analysis failed")
    .completed()
    .expect("Analysis was cancelled");

    // 17 instances, 12 bytes each.
    assert!(report.contains("Instances of Sample: 17"));
    assert!(report.contains("17     204 bytes  Sample"));
}

#[test]
fn test_cyclic_graph_analyzes_end_to_end() {
    let class = ClassMirror::new(
        "Ring",
        &[("next", FieldType::Object), ("prev", FieldType::Object)],
    );
    let a = Obj::instance(&class);
    let b = Obj::instance(&class);
    a.set_field("next", Value::Ref(Some(Rc::clone(&b))));
    a.set_field("prev", Value::Ref(Some(Rc::clone(&b))));
    b.set_field("next", Value::Ref(Some(Rc::clone(&a))));
    b.set_field("prev", Value::Ref(Some(Rc::clone(&a))));

    let mut builder = DumpBuilder::new(Vec::new(), IdSize::Eight, 0).unwrap();
    builder.add_root_unknown(&a).unwrap();
    let bytes = builder.finish().unwrap();

    let tmp = write_dump(&bytes);
    let report = analyze_dump(
        tmp.path(),
        &ReportOptions {
            include_dominator_section: true,
            include_ownership_section: true,
            ..ReportOptions::default()
        },
        ReportFormat::Text,
        StorageBacking::Memory,
        &Silent,
    )
    .expect("Cyclic analysis failed")
    .completed()
    .expect("Cyclic analysis was cancelled");

    assert!(report.contains("Instances of Ring: 2"));
}

#[test]
fn test_remap_is_a_bijection() {
    let class = ClassMirror::new("Filler", &[("pad", FieldType::Long)]);
    let mut builder = DumpBuilder::new(Vec::new(), IdSize::Eight, 0).unwrap();
    for _ in 0..100 {
        builder.add_object(Some(&Obj::instance(&class))).unwrap();
    }
    let bytes = builder.finish().unwrap();

    let tmp = write_dump(&bytes);
    let dump = parse_dump(tmp.path(), &Silent)
        .unwrap()
        .completed()
        .unwrap();
    let remapper = IdRemapper::build(&dump.objects, &StorageBacking::File).unwrap();

    assert_eq!(remapper.len(), 100);
    for dense in 0..remapper.len() as u32 {
        let original = remapper.original_of(dense).unwrap();
        assert_eq!(
            remapper.dense_of(original).unwrap(),
            Some(dense),
            "Remap did not invert for dense id {}",
            dense
        );
    }
}

#[test]
fn test_report_is_byte_identical_across_runs() {
    let bytes = capture_test_string_scenario();
    let tmp = write_dump(&bytes);

    let options = ReportOptions {
        include_meta_section: true,
        include_dominator_section: true,
        include_ownership_section: true,
        histogram_by_size: true,
        ..ReportOptions::default()
    };
    let run = |backing| {
        analyze_dump(tmp.path(), &options, ReportFormat::Text, backing, &Silent)
            .expect("Analysis failed")
            .completed()
            .expect("Analysis was cancelled")
    };

    let first = run(StorageBacking::Memory);
    let second = run(StorageBacking::Memory);
    assert_eq!(first, second, "Same dump, same options, different report");

    // Backing choice changes resource usage, not the report.
    assert_eq!(first, run(StorageBacking::File));
}

#[test]
fn test_cancellation_yields_cancelled_outcome() {
    let bytes = capture_test_string_scenario();
    let tmp = write_dump(&bytes);

    let flag = CancelFlag::new();
    flag.cancel();
    let outcome = analyze_dump(
        tmp.path(),
        &ReportOptions::default(),
        ReportFormat::Text,
        StorageBacking::File,
        &flag,
    )
    .expect("Cancelled run must not be an error");

    assert!(matches!(outcome, Outcome::Cancelled));
}

#[test]
fn test_no_scratch_files_left_behind() {
    let bytes = capture_test_string_scenario();
    let tmp = write_dump(&bytes);
    let scratch = tempfile::tempdir().expect("Failed to create scratch dir");
    let backing = || StorageBacking::FileIn(scratch.path().to_path_buf());

    let flag = CancelFlag::new();
    flag.cancel();
    let outcome = analyze_dump(
        tmp.path(),
        &ReportOptions::default(),
        ReportFormat::Text,
        backing(),
        &flag,
    )
    .expect("Cancelled run must not be an error");
    assert!(matches!(outcome, Outcome::Cancelled));
    assert_eq!(
        std::fs::read_dir(scratch.path()).unwrap().count(),
        0,
        "Cancelled run left scratch files behind"
    );

    analyze_dump(
        tmp.path(),
        &ReportOptions::default(),
        ReportFormat::Text,
        backing(),
        &Silent,
    )
    .expect("Analysis failed")
    .completed()
    .expect("Analysis was cancelled");
    assert_eq!(
        std::fs::read_dir(scratch.path()).unwrap().count(),
        0,
        "Completed run left scratch files behind"
    );
}

#[test]
fn test_truncated_dump_is_reported_corrupt() {
    let bytes = capture_test_string_scenario();
    // Cut into the final instance payload; the scan must refuse the dump
    // instead of indexing a payload that is not there.
    let tmp = write_dump(&bytes[..bytes.len() - 2]);

    for backing in [StorageBacking::Memory, StorageBacking::File] {
        let err = analyze_dump(
            tmp.path(),
            &ReportOptions::default(),
            ReportFormat::Text,
            backing,
            &Silent,
        )
        .expect_err("Truncated dump must not analyze");
        assert!(
            matches!(
                err.downcast_ref::<HeapDumpError>(),
                Some(HeapDumpError::Corrupt { .. })
            ),
            "Expected a corrupt-dump error, got {:#}",
            err
        );
    }
}

#[test]
fn test_test_string_end_to_end_scenario() {
    let bytes = capture_test_string_scenario();
    let tmp = write_dump(&bytes);

    let report = analyze_dump(
        tmp.path(),
        &ReportOptions {
            class_names: Some(vec!["TestString".to_string(), "B".to_string()]),
            ..ReportOptions::default()
        },
        ReportFormat::Text,
        StorageBacking::Memory,
        &Silent,
    )
    .expect("Analysis failed")
    .completed()
    .expect("Analysis was cancelled");

    // One TestString instance despite two inbound references.
    assert!(report.contains("Instances of TestString: 1"));
    // Both field names show on one hop of A's path.
    assert!(report.contains(".first, .second -> TestString"));
    assert!(report.contains("[unknown root] A"));
    // B exists but belongs to no root-to-instance path.
    assert!(report.contains("unreachable from any GC root"));
    assert!(!report.contains("-> B"));
}

#[test]
fn test_json_report_shape() {
    let bytes = capture_test_string_scenario();
    let tmp = write_dump(&bytes);

    let json = analyze_dump(
        tmp.path(),
        &ReportOptions::default(),
        ReportFormat::Json,
        StorageBacking::Memory,
        &Silent,
    )
    .expect("Analysis failed")
    .completed()
    .expect("Analysis was cancelled");

    let value: serde_json::Value = serde_json::from_str(&json).expect("Report is not JSON");
    // text "x", TestString, A, B.
    assert_eq!(value["summary"]["total_objects"], 4);
    assert_eq!(value["summary"]["reachable_objects"], 3);
    assert_eq!(value["summary"]["gc_roots"], 1);
    assert!(value["histogram"].as_array().is_some_and(|h| !h.is_empty()));
}
