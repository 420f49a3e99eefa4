use pipstack::Project;

const PIPFILE_CONTENT: &str = r#"
[[source]]
url = "https://pypi.org/simple"
verify_ssl = true
name = "pypi"

[packages]
requests = "*"
semantic-version = "==2.6.0"

[dev-packages]
pytest = "*"

[requires]
python_version = "3.6"
"#;

const PIPFILE_LOCK_CONTENT: &str = r#"{
    "_meta": {
        "hash": {"sha256": "00"},
        "pipfile-spec": 6,
        "requires": {"python_version": "3.6"},
        "sources": [
            {"name": "pypi", "url": "https://pypi.org/simple", "verify_ssl": true}
        ]
    },
    "default": {
        "requests": {
            "hashes": [
                "sha256:502a824f31acdacb3a35b6690b5fbf0bc41d63a24a45c4004352b0242707598e"
            ],
            "index": "pypi",
            "version": "==2.21.0"
        },
        "semantic-version": {
            "hashes": [
                "sha256:2a4328680073e9b243667b201119772aefc5fc63ae32398d6afafff07c4f54c0"
            ],
            "version": "==2.6.0"
        }
    },
    "develop": {
        "pytest": {
            "hashes": [
                "sha256:3e65a22eb0d4f1bdbc1eacccf4a3198bf8d4049dea5112d70a0c61b00e748d02"
            ],
            "version": "==4.4.1"
        }
    }
}"#;

#[test]
fn test_files_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let pipfile_path = dir.path().join("Pipfile");
    let lock_path = dir.path().join("Pipfile.lock");

    let mut project = Project::from_strings(PIPFILE_CONTENT, Some(PIPFILE_LOCK_CONTENT)).unwrap();
    project.to_files(&pipfile_path, Some(&lock_path)).unwrap();

    let reloaded = Project::from_files(&pipfile_path, Some(&lock_path)).unwrap();

    assert_eq!(reloaded.python_version(), Some("3.6"));
    assert_eq!(
        reloaded.pipfile.hash().unwrap(),
        project.pipfile.hash().unwrap()
    );

    let names: Vec<&str> = reloaded
        .iter_dependencies(true)
        .map(|pv| pv.name.as_str())
        .collect();
    assert_eq!(names, vec!["requests", "semantic-version", "pytest"]);

    let requests = reloaded.get_locked_package_version("requests").unwrap();
    assert_eq!(requests.version, "==2.21.0");
    assert_eq!(requests.index.as_ref().unwrap().name, "pypi");
    assert_eq!(requests.hashes.len(), 1);
}

#[test]
fn test_written_lock_hash_matches_pipfile() {
    let dir = tempfile::tempdir().unwrap();
    let pipfile_path = dir.path().join("Pipfile");
    let lock_path = dir.path().join("Pipfile.lock");

    let mut project = Project::from_strings(PIPFILE_CONTENT, Some(PIPFILE_LOCK_CONTENT)).unwrap();
    project.to_files(&pipfile_path, Some(&lock_path)).unwrap();

    let reloaded = Project::from_files(&pipfile_path, Some(&lock_path)).unwrap();
    let lock = reloaded.pipfile_lock.as_ref().unwrap();

    assert_eq!(
        lock.meta.hash.as_deref(),
        Some(reloaded.pipfile.hash().unwrap().as_str())
    );
    assert_eq!(lock.meta.pipfile_spec, Some(6));
}

#[test]
fn test_to_files_without_lock_fails() {
    let dir = tempfile::tempdir().unwrap();
    let pipfile_path = dir.path().join("Pipfile");
    let lock_path = dir.path().join("Pipfile.lock");

    let mut project = Project::from_strings(PIPFILE_CONTENT, None).unwrap();
    assert!(project.to_files(&pipfile_path, Some(&lock_path)).is_err());
    assert!(project.to_files(&pipfile_path, None).is_ok());
}

#[test]
fn test_lock_output_is_stable() {
    let mut first = Project::from_strings(PIPFILE_CONTENT, Some(PIPFILE_LOCK_CONTENT)).unwrap();
    let mut second = Project::from_strings(PIPFILE_CONTENT, Some(PIPFILE_LOCK_CONTENT)).unwrap();

    let pipfile = first.pipfile.clone();
    let first_json = first
        .pipfile_lock
        .as_mut()
        .unwrap()
        .to_json(Some(&pipfile))
        .unwrap();
    let second_json = second
        .pipfile_lock
        .as_mut()
        .unwrap()
        .to_json(Some(&pipfile))
        .unwrap();

    assert_eq!(first_json, second_json);
    assert!(first_json.ends_with('\n'));
}
