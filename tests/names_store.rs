use modbus_console::{Category, NameTable, NamesConfig, NamesError, NamesManager};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn snapshot(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

#[test]
fn fresh_store_then_set_name_persists() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("modbus_names.json");
    let store = NamesManager::open(&path);

    assert_eq!(store.get_name("coils", 3).unwrap(), "Coil_3");
    assert!(!path.exists());

    store.set_name("coils", 3, "Pump Enable").unwrap();
    assert_eq!(store.get_name("coils", 3).unwrap(), "Pump Enable");
    assert_eq!(snapshot(&path)["coils"]["3"], "Pump Enable");

    let reopened = NamesManager::open(&path);
    assert_eq!(reopened.get_name("coils", 3).unwrap(), "Pump Enable");
    assert_eq!(reopened.get_all_names(), store.get_all_names());
}

#[test]
fn unlabeled_addresses_are_synthesized_not_stored() {
    let dir = tempdir().unwrap();
    let store = NamesManager::with_config(&NamesConfig {
        path: dir.path().join("names.json"),
    });

    assert_eq!(store.get_name("registers", 500).unwrap(), "Register_500");
    assert_eq!(store.get_name("inputs", 16).unwrap(), "Input_16");
    assert_eq!(store.label(Category::Coils, 1000), "Coil_1000");
    assert!(!store.get_all_names().registers.contains_key(&500));
}

#[test]
fn invalid_category_changes_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("names.json");
    let store = NamesManager::open(&path);
    store.set_name("inputs", 1, "Door").unwrap();
    let before_bytes = fs::read(&path).unwrap();
    let before = store.get_all_names();

    let err = store.set_name("holding", 1, "Setpoint").unwrap_err();
    assert!(matches!(err, NamesError::InvalidCategory(ref c) if c == "holding"));
    assert!(matches!(store.get_name("outputs", 1), Err(NamesError::InvalidCategory(_))));
    assert!(matches!(store.remove_name("", 1), Err(NamesError::InvalidCategory(_))));

    assert_eq!(store.get_all_names(), before);
    assert_eq!(fs::read(&path).unwrap(), before_bytes);
}

#[test]
fn get_all_names_is_a_copy() {
    let dir = tempdir().unwrap();
    let store = NamesManager::open(dir.path().join("names.json"));

    let mut copy = store.get_all_names();
    copy.coils.insert(3, "Tampered".to_string());
    copy.registers.clear();

    assert_eq!(store.get_name("coils", 3).unwrap(), "Coil_3");
    assert_eq!(store.get_all_names().registers.len(), 16);
}

#[test]
fn reset_overwrites_custom_labels() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("names.json");
    let store = NamesManager::open(&path);
    store.set_name("coils", 3, "Pump Enable").unwrap();
    store.set_name("registers", 200, "Flow").unwrap();
    store.remove_name("inputs", 0).unwrap();

    store.reset_to_defaults().unwrap();

    let table = store.get_all_names();
    assert_eq!(table, NameTable::defaults());
    for category in Category::ALL {
        let names = table.category(category);
        assert_eq!(names.keys().copied().collect::<Vec<_>>(), (0..16).collect::<Vec<u16>>());
        for (address, label) in names {
            assert_eq!(*label, category.default_name(*address));
        }
    }
    assert_eq!(snapshot(&path)["coils"]["3"], "Coil_3");
}

#[test]
fn export_then_import_reproduces_the_table() {
    let dir = tempdir().unwrap();
    let store = NamesManager::open(dir.path().join("names.json"));
    store.set_name("coils", 3, "Pump Enable").unwrap();
    store.set_name("registers", 40, "Speed Setpoint").unwrap();
    store.add_address("inputs", 300, None).unwrap();
    let exported = store.get_all_names();

    let export_path = dir.path().join("export.json");
    store.export_to_file(&export_path).unwrap();
    let doc = snapshot(&export_path);
    assert!(doc.get("inputs").is_some() && doc.get("coils").is_some() && doc.get("registers").is_some());

    store.reset_to_defaults().unwrap();
    assert_ne!(store.get_all_names(), exported);

    store.import_from_file(&export_path).unwrap();
    assert_eq!(store.get_all_names(), exported);

    let other = NamesManager::open(dir.path().join("other.json"));
    other.import_from_file(&export_path).unwrap();
    assert_eq!(other.get_all_names(), exported);
}

#[test]
fn import_replaces_rather_than_merges() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("names.json");
    let store = NamesManager::open(&path);

    let import_path = dir.path().join("import.json");
    fs::write(&import_path, r#"{"inputs": {"7": "Estop"}, "coils": {}, "registers": {"1": "Level"}}"#).unwrap();
    store.import_from_file(&import_path).unwrap();

    let table = store.get_all_names();
    assert_eq!(table.inputs.len(), 1);
    assert!(table.coils.is_empty());
    assert_eq!(table.registers[&1], "Level");
    assert_eq!(snapshot(&path)["inputs"]["7"], "Estop");
}

#[test]
fn import_missing_registers_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("names.json");
    let store = NamesManager::open(&path);
    store.set_name("coils", 3, "Pump Enable").unwrap();
    let before = store.get_all_names();
    let before_bytes = fs::read(&path).unwrap();

    let import_path = dir.path().join("partial.json");
    fs::write(&import_path, r#"{"inputs": {"0": "A"}, "coils": {"0": "B"}}"#).unwrap();
    let err = store.import_from_file(&import_path).unwrap_err();
    assert!(matches!(err, NamesError::ImportValidation(_)));

    fs::write(&import_path, "not json at all").unwrap();
    assert!(matches!(store.import_from_file(&import_path), Err(NamesError::ImportValidation(_))));

    assert!(matches!(
        store.import_from_file(dir.path().join("missing.json")),
        Err(NamesError::Import { .. })
    ));

    assert_eq!(store.get_all_names(), before);
    assert_eq!(fs::read(&path).unwrap(), before_bytes);
}

#[test]
fn export_to_unwritable_path_fails_without_touching_store() {
    let dir = tempdir().unwrap();
    let store = NamesManager::open(dir.path().join("names.json"));
    store.set_name("coils", 1, "Valve").unwrap();
    let before = store.get_all_names();

    let err = store
        .export_to_file(dir.path().join("no-such-dir").join("export.json"))
        .unwrap_err();
    assert!(matches!(err, NamesError::Export { .. }));
    assert_eq!(store.get_all_names(), before);
}

#[test]
fn failed_persist_keeps_the_in_memory_edit() {
    let dir = tempdir().unwrap();
    let store = NamesManager::open(dir.path().join("missing-dir").join("names.json"));

    let err = store.set_name("registers", 2, "Pressure").unwrap_err();
    assert!(matches!(err, NamesError::Persistence { .. }));
    assert_eq!(store.get_name("registers", 2).unwrap(), "Pressure");
    assert!(store.save().is_err());
}

#[test]
fn reload_picks_up_external_changes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("names.json");
    let store = NamesManager::open(&path);
    store.set_name("coils", 0, "Old").unwrap();

    fs::write(&path, r#"{"inputs": {}, "coils": {"0": "New"}, "registers": {}}"#).unwrap();
    assert!(store.reload());
    assert_eq!(store.get_name("coils", 0).unwrap(), "New");

    fs::remove_file(&path).unwrap();
    assert!(store.reload());
    assert_eq!(store.get_all_names(), NameTable::defaults());
}

#[test]
fn set_all_names_replaces_and_persists() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("names.json");
    let store = NamesManager::open(&path);

    let mut table = NameTable::default();
    table.registers.insert(9, "Nine".to_string());
    store.set_all_names(table.clone()).unwrap();

    assert_eq!(store.get_all_names(), table);
    assert_eq!(NamesManager::open(&path).get_all_names(), table);
}

#[test]
fn concurrent_edits_are_not_lost() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("names.json");
    let store = Arc::new(NamesManager::open(&path));

    let handles: Vec<_> = (0..4u16)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..20u16 {
                    let address = 100 + worker * 20 + i;
                    store.set_name("registers", address, &format!("R{}", address)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let persisted = NamesManager::open(&path).get_all_names();
    assert_eq!(persisted.registers.len(), 16 + 80);
    assert_eq!(persisted, store.get_all_names());
    assert_eq!(persisted.registers[&179], "R179");
}

#[test]
fn concurrent_exports_to_one_path_all_succeed() {
    let dir = tempdir().unwrap();
    let store = Arc::new(NamesManager::open(dir.path().join("names.json")));
    store.set_name("coils", 3, "Pump Enable").unwrap();
    let export_path = dir.path().join("export.json");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let export_path = export_path.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    store.export_to_file(&export_path).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(snapshot(&export_path)["coils"]["3"], "Pump Enable");
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|name| name != "names.json" && name != "export.json")
        .collect();
    assert!(leftovers.is_empty(), "stray files: {:?}", leftovers);
}

#[test]
fn export_over_snapshot_never_loses_an_edit() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("names.json");
    let store = Arc::new(NamesManager::open(&path));

    let exporter = {
        let store = Arc::clone(&store);
        let path = path.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                store.export_to_file(&path).unwrap();
            }
        })
    };
    for i in 0..100u16 {
        store.set_name("registers", 1000 + i, &format!("R{}", i)).unwrap();
    }
    exporter.join().unwrap();

    let persisted = NamesManager::open(&path).get_all_names();
    assert_eq!(persisted, store.get_all_names());
    assert_eq!(persisted.registers[&1099], "R99");
}
