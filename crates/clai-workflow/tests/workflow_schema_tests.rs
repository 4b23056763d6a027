use clai_workflow::schema::{parse_workflow_file, parse_workflow_str};
use clai_workflow::validate::validate;
use std::fs;
use tempfile::tempdir;

#[test]
fn parses_valid_workflow() {
    let yaml = r#"
name: build-and-test
env:
  RUST_LOG: info
jobs:
  main:
    steps:
      - id: checkout
        name: Checkout
        run: echo "checking out"
      - id: build
        run: echo "building"
"#;
    let workflow = parse_workflow_str(yaml).expect("should parse valid workflow");
    assert_eq!(workflow.name, "build-and-test");
    assert_eq!(workflow.env["RUST_LOG"], "info");
    assert_eq!(workflow.jobs["main"].steps.len(), 2);
    assert!(validate(&workflow).is_empty());
}

#[test]
fn parses_from_file() {
    let yaml = "name: from-file\njobs:\n  main:\n    steps:\n      - id: a\n        run: echo hi\n";
    let dir = tempdir().unwrap();
    let path = dir.path().join("workflow.yml");
    fs::write(&path, yaml).unwrap();

    let workflow = parse_workflow_file(&path).expect("should parse file");
    assert_eq!(workflow.name, "from-file");
}

#[test]
fn parses_secrets_and_requires() {
    let yaml = r#"
name: with-secrets
secrets:
  - name: API_TOKEN
    from: env
  - name: DEPLOY_KEY
    from: file
    path: /etc/deploy.key
requires: [git, docker]
jobs:
  main:
    steps:
      - id: a
        run: echo hi
"#;
    let workflow = parse_workflow_str(yaml).unwrap();
    assert_eq!(workflow.secrets.len(), 2);
    assert_eq!(workflow.requires, vec!["git", "docker"]);
    assert!(validate(&workflow).is_empty());
}

#[test]
fn parses_analysis_fields() {
    let yaml = r#"
name: analyzed
jobs:
  main:
    steps:
      - id: deploy
        run: ./deploy.sh
        analyze: true
        analysis_prompt: "check for deployment errors"
        risk_level: high
"#;
    let workflow = parse_workflow_str(yaml).unwrap();
    let step = &workflow.jobs["main"].steps[0];
    assert!(step.analyze);
    assert_eq!(step.analysis_prompt.as_deref(), Some("check for deployment errors"));
    assert!(validate(&workflow).is_empty());
}

#[test]
fn parses_matrix_include() {
    let yaml = r#"
name: matrixed
jobs:
  main:
    strategy:
      matrix:
        include:
          - os: linux
            arch: x64
          - os: darwin
            arch: arm64
    steps:
      - id: build
        run: echo "building"
"#;
    let workflow = parse_workflow_str(yaml).unwrap();
    let matrix = workflow.jobs["main"]
        .strategy
        .as_ref()
        .unwrap()
        .matrix
        .as_ref()
        .unwrap();
    assert_eq!(matrix.include.len(), 2);
    assert_eq!(matrix.include[1]["arch"], "arm64");
    assert!(validate(&workflow).is_empty());
}

// --- Schema strictness ---

#[test]
fn rejects_unknown_top_level_field() {
    let yaml = "name: t\nschedule: nightly\njobs:\n  main:\n    steps:\n      - id: a\n        run: echo hi\n";
    assert!(parse_workflow_str(yaml).is_err());
}

#[test]
fn rejects_unknown_job_field() {
    let yaml = "name: t\njobs:\n  main:\n    runs_on: ubuntu\n    steps:\n      - id: a\n        run: echo hi\n";
    assert!(parse_workflow_str(yaml).is_err());
}

#[test]
fn rejects_unknown_step_field() {
    let yaml = "name: t\njobs:\n  main:\n    steps:\n      - id: a\n        run: echo hi\n        retries: 3\n";
    assert!(parse_workflow_str(yaml).is_err());
}

#[test]
fn rejects_invalid_risk_level() {
    let yaml = "name: t\njobs:\n  main:\n    steps:\n      - id: a\n        run: echo hi\n        risk_level: extreme\n";
    assert!(parse_workflow_str(yaml).is_err());
}

#[test]
fn rejects_yaml_syntax_errors() {
    assert!(parse_workflow_str("name: [unterminated").is_err());
}

// --- Validation ---

#[test]
fn empty_name_is_a_validation_error() {
    let yaml = "name: \"\"\njobs:\n  main:\n    steps:\n      - id: a\n        run: echo hi\n";
    let workflow = parse_workflow_str(yaml).unwrap();
    let errors = validate(&workflow);
    assert!(errors.iter().any(|e| e.path == "name"));
}

#[test]
fn missing_jobs_is_a_validation_error() {
    let workflow = parse_workflow_str("name: t\njobs: {}\n").unwrap();
    let errors = validate(&workflow);
    assert!(errors.iter().any(|e| e.path == "jobs"));
}

#[test]
fn job_without_steps_is_a_validation_error() {
    let workflow = parse_workflow_str("name: t\njobs:\n  main:\n    steps: []\n").unwrap();
    let errors = validate(&workflow);
    assert!(errors.iter().any(|e| e.path == "jobs.main.steps"));
}

#[test]
fn duplicate_step_ids_are_rejected() {
    let yaml = r#"
name: t
jobs:
  main:
    steps:
      - id: build
        run: echo one
      - id: build
        run: echo two
"#;
    let workflow = parse_workflow_str(yaml).unwrap();
    let errors = validate(&workflow);
    assert!(errors.iter().any(|e| e.message.contains("duplicate step id 'build'")));
}

#[test]
fn analyze_without_prompt_is_rejected() {
    let yaml = r#"
name: t
jobs:
  main:
    steps:
      - id: scan
        run: echo hi
        analyze: true
"#;
    let workflow = parse_workflow_str(yaml).unwrap();
    let errors = validate(&workflow);
    assert!(errors
        .iter()
        .any(|e| e.path == "jobs.main.steps[0].analysis_prompt"));
}

#[test]
fn matrix_key_set_mismatch_is_rejected() {
    let yaml = r#"
name: t
jobs:
  main:
    strategy:
      matrix:
        include:
          - os: linux
            arch: x64
          - os: darwin
    steps:
      - id: build
        run: echo hi
"#;
    let workflow = parse_workflow_str(yaml).unwrap();
    let errors = validate(&workflow);
    assert!(errors
        .iter()
        .any(|e| e.path == "jobs.main.strategy.matrix.include[1]"));
}

#[test]
fn dangling_needs_reference_is_rejected() {
    let yaml = r#"
name: t
jobs:
  main:
    needs: [ghost]
    steps:
      - id: a
        run: echo hi
"#;
    let workflow = parse_workflow_str(yaml).unwrap();
    let errors = validate(&workflow);
    assert!(errors
        .iter()
        .any(|e| e.message.contains("undefined job 'ghost'")));
}

#[test]
fn needs_cycle_is_reported_with_its_path() {
    let yaml = r#"
name: t
jobs:
  a:
    needs: [c]
    steps:
      - id: s
        run: echo hi
  b:
    needs: [a]
    steps:
      - id: s
        run: echo hi
  c:
    needs: [b]
    steps:
      - id: s
        run: echo hi
"#;
    let workflow = parse_workflow_str(yaml).unwrap();
    let errors = validate(&workflow);
    let cycle = errors
        .iter()
        .find(|e| e.message.contains("dependency cycle detected"))
        .expect("cycle error expected");
    assert!(cycle.message.contains(" -> "));
}

#[test]
fn round_trip_preserves_the_tree() {
    let yaml = r#"
name: round-trip
env:
  KEY: value
secrets:
  - name: TOKEN
jobs:
  main:
    env:
      JOB_KEY: job-value
    strategy:
      matrix:
        include:
          - os: linux
    steps:
      - id: a
        name: first
        run: echo hi
        shell: bash
        env:
          STEP_KEY: step-value
        analyze: true
        analysis_prompt: check it
        risk_level: medium
"#;
    let parsed = parse_workflow_str(yaml).unwrap();
    let reserialized = serde_yaml::to_string(&parsed).unwrap();
    let reparsed = parse_workflow_str(&reserialized).unwrap();

    assert!(validate(&reparsed).is_empty());
    assert_eq!(reparsed.name, parsed.name);
    assert_eq!(reparsed.secrets.len(), parsed.secrets.len());
    let step = &reparsed.jobs["main"].steps[0];
    assert_eq!(step.id, "a");
    assert_eq!(step.env["STEP_KEY"], "step-value");
    assert_eq!(step.analysis_prompt.as_deref(), Some("check it"));
}
