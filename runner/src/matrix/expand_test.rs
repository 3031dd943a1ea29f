use super::{Matrix, MatrixError, Reference, Value};

fn pairs(matrix: &Matrix) -> Vec<String> {
    matrix
        .expand()
        .unwrap()
        .iter()
        .map(|configuration| configuration.to_string())
        .collect()
}

fn scenario() -> Matrix {
    Matrix::new()
        .parameter("x", [1, 2])
        .parameter("y", ["a", "b"])
}

#[test]
pub fn last_key_varies_fastest() {
    assert_eq!(
        pairs(&scenario()),
        vec![
            "{x: 1, y: a}",
            "{x: 1, y: b}",
            "{x: 2, y: a}",
            "{x: 2, y: b}"
        ]
    );
}

#[test]
pub fn exclude_drops_matching_configurations() {
    let matrix = scenario().exclude([("x", Value::from(1)), ("y", Value::from("a"))]);

    assert_eq!(
        pairs(&matrix),
        vec!["{x: 1, y: b}", "{x: 2, y: a}", "{x: 2, y: b}"]
    );
}

#[test]
pub fn exclude_keys_are_wildcards_and_rules_are_or() {
    let matrix = Matrix::new()
        .parameter("x", [1, 2, 3])
        .parameter("y", ["a", "b"])
        .parameter("z", [true, false])
        .exclude([("x", 1)])
        .exclude([("y", Value::from("b")), ("z", Value::from(false))]);

    let configurations = matrix.expand().unwrap();
    let excluded = configurations
        .iter()
        .filter(|configuration| {
            configuration.get("x") == Some(&Value::Int(1))
                || (configuration.get("y") == Some(&Value::from("b"))
                    && configuration.get("z") == Some(&Value::Bool(false)))
        })
        .count();

    assert_eq!(excluded, 0);
    // 12 combinations, 4 with x = 1, 2 more with (y = b, z = false) and x != 1
    assert_eq!(matrix.size(), 12);
    assert_eq!(configurations.len(), 6);
}

#[test]
pub fn settings_are_shared_not_copied() {
    let matrix = scenario().setting("epochs", 3);
    let configurations = matrix.expand().unwrap();

    assert!(configurations
        .iter()
        .all(|configuration| configuration.shares_settings(&configurations[0])));
    assert_eq!(configurations[3].settings().i64("epochs"), Ok(3));
}

#[test]
pub fn missing_parameters_is_a_setup_error() {
    assert!(matches!(
        Matrix::new().expand(),
        Err(MatrixError::MissingParameters)
    ));
    assert!(matches!(
        Matrix::from_yaml_str("settings:\n  epochs: 3\n"),
        Err(MatrixError::MissingParameters)
    ));
}

#[test]
pub fn unknown_exclude_key_is_a_setup_error() {
    let matrix = scenario().exclude([("w", 1)]);

    match matrix.expand() {
        Err(MatrixError::UnknownExcludeKey { index, key }) => {
            assert_eq!(index, 0);
            assert_eq!(key, "w");
        }
        other => panic!("expected an unknown key error, got {other:?}"),
    }
}

#[test]
pub fn settings_is_reserved() {
    let matrix = Matrix::new().parameter("settings", [1]);

    assert!(matches!(matrix.expand(), Err(MatrixError::ReservedName(_))));
}

#[test]
pub fn empty_value_list_expands_to_nothing() {
    let matrix = scenario().parameter("z", Vec::<i64>::new());

    assert!(matrix.expand().unwrap().is_empty());
}

#[test]
pub fn yaml_document() {
    let matrix = Matrix::from_yaml_str(
        r#"
parameters:
  model:
    - !ref linear
    - !ref { id: pipeline, args: { scale: 2.5, steps: [!ref normalize] } }
  seed: [1, 2]
settings:
  epochs: 10
exclude:
  - { model: !ref linear, seed: 2 }
"#,
    )
    .unwrap();

    assert_eq!(matrix.parameters.keys().collect::<Vec<_>>(), ["model", "seed"]);
    assert_eq!(matrix.settings.i64("epochs"), Ok(10));

    let configurations = matrix.expand().unwrap();
    assert_eq!(configurations.len(), 3);

    let pipeline = Reference::new("pipeline")
        .arg("scale", 2.5)
        .arg("steps", vec![Value::Ref(Reference::new("normalize"))]);
    assert_eq!(
        configurations[1].get("model"),
        Some(&Value::Ref(pipeline.clone()))
    );
    assert_eq!(
        configurations[1].to_string(),
        "{model: pipeline{scale: 2.5, steps: [normalize]}, seed: 1}"
    );
    assert_eq!(
        configurations[0]
            .get("model")
            .map(|model| model.references().len()),
        Some(1)
    );
    assert_eq!(Value::Ref(pipeline).references().len(), 2);
}

#[test]
pub fn yaml_rejects_unknown_sections_and_scalars() {
    assert!(matches!(
        Matrix::from_yaml_str("parameters:\n  x: [1]\nexcludes: []\n"),
        Err(MatrixError::Parse(_))
    ));
    assert!(matches!(
        Matrix::from_yaml_str("parameters:\n  x: 1\n"),
        Err(MatrixError::NotAList(_))
    ));
    assert!(matches!(
        Matrix::from_yaml_str("parameters:\n  x: [!model linear]\n"),
        Err(MatrixError::InvalidValue(_))
    ));
}
