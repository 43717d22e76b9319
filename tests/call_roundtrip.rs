use std::sync::Arc;

use serde_json::{json, Map, Value};

use skyhook::{
    contract_from_str, resolve_document, Bindings, Client, Contract, Dispatcher, EntryPoint,
    Interface, SkyhookError,
};

fn args(value: Value) -> Map<String, Value> {
    value.as_object().expect("object").clone()
}

fn calculator() -> Arc<Contract> {
    contract_from_str(
        r#"{
            "service": {"name": "calculator", "version": "1.2.0", "description": "Adds numbers."},
            "functions": [{
                "name": "add",
                "description": "Adds two integers.",
                "arguments": [
                    {"name": "a", "description": "Left operand.", "schema": {"type": "integer"}},
                    {"name": "b", "description": "Right operand.", "schema": {"type": "integer"}}
                ],
                "returns": {"description": "The sum.", "schema": {"type": "integer"}}
            }]
        }"#,
    )
    .expect("calculator contract")
}

fn stub(response: Value) -> impl Fn(&str, &[u8]) -> Result<Vec<u8>, SkyhookError> + Send + Sync {
    move |_, _| Ok(serde_json::to_vec(&response).expect("encode"))
}

fn unicorn_shop() -> Interface {
    resolve_document(&json!({
        "service": {"name": "unicorn-shop", "version": "1.0.0", "description": "Sells unicorns."},
        "types": [{
            "name": "colour",
            "description": "Colours a unicorn can be.",
            "schema": {"enum": ["red", "yellow", "pink", "blue"]}
        }],
        "schemas": {
            "UnicornColour": {"$ref": "#/types/colour"},
            "Outcome": {"oneOf": [
                {"type": "object", "properties": {"value": {"type": "integer"}}, "required": ["value"], "additionalProperties": false},
                {"type": "object", "properties": {"error": {"type": "string"}}, "required": ["error"], "additionalProperties": false}
            ]}
        },
        "functions": [
            {
                "name": "buy",
                "description": "Buys a unicorn.",
                "arguments": [
                    {"name": "colour", "description": "Wanted colour.", "schema": {"$ref": "#/schemas/UnicornColour"}}
                ],
                "returns": {"description": "Price or error.", "schema": {"$ref": "#/schemas/Outcome"}}
            }
        ],
        "messages": [
            {"name": "unicorn-sold", "description": "A unicorn was sold.", "schema": {"$ref": "#/schemas/UnicornColour"}}
        ]
    }))
    .expect("unicorn shop resolves")
}

#[test]
fn add_returns_remote_result_when_bound() {
    let client = Client::new(calculator(), stub(json!({"result": 10})));
    let _guard = client.bind(Bindings::new().with_function("add", "calculator-add"));
    let value = client.call("add", args(json!({"a": 5, "b": 5}))).expect("call");
    assert_eq!(value, json!(10));
}

#[test]
fn add_fails_while_unbound() {
    let client = Client::new(calculator(), stub(json!({"result": 10})));
    let err = client.call("add", args(json!({"a": 5, "b": 5}))).unwrap_err();
    assert!(matches!(err, SkyhookError::Unbound(_)));
}

#[test]
fn add_rejects_string_operand_at_argument_path() {
    let client = Client::new(calculator(), stub(json!({"result": 10})));
    let err = client
        .scoped(Bindings::new().with_function("add", "calculator-add"), || {
            client.call("add", args(json!({"a": "x", "b": 5})))
        })
        .unwrap_err();
    match err {
        SkyhookError::Validation(violation) => assert_eq!(violation.path_labels(), vec!["a"]),
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn nested_scope_restores_outer_binding() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let client = Client::new(calculator(), move |endpoint: &str, _: &[u8]| {
        log.lock().expect("lock").push(endpoint.to_string());
        Ok::<_, SkyhookError>(br#"{"result": 0}"#.to_vec())
    });
    let call = || client.call("add", args(json!({"a": 0, "b": 0}))).expect("call");

    client.scoped(Bindings::new().with_function("add", "outer"), || {
        call();
        client.scoped(Bindings::new().with_function("add", "inner"), || call());
        call();
    });
    assert!(!client.is_bound());
    assert_eq!(*seen.lock().expect("lock"), vec!["outer", "inner", "outer"]);
}

#[test]
fn colour_argument_rejects_unknown_colour() {
    let contract = Arc::new(Contract::new(Arc::new(unicorn_shop())));
    let buy = contract.function("buy").expect("buy");
    let err = buy.check_arguments(&args(json!({"colour": "green"}))).unwrap_err();
    assert!(matches!(err, SkyhookError::Validation(_)));
    assert_eq!(err.violation().expect("violation").path_labels(), vec!["colour"]);
    buy.check_arguments(&args(json!({"colour": "pink"}))).expect("pink is valid");
}

#[test]
fn reusable_schema_is_shared_between_argument_and_message() {
    let interface = unicorn_shop();
    let argument = &interface.function("buy").expect("buy").arguments[0].schema;
    let message = &interface.message("unicorn-sold").expect("message").schema;
    assert!(Arc::ptr_eq(argument, message));
    assert!(Arc::ptr_eq(argument, interface.schema("UnicornColour").expect("fragment")));
}

#[test]
fn one_of_result_is_checked_by_entry_point() {
    let contract = Arc::new(Contract::new(Arc::new(unicorn_shop())));
    let respond = |result: Value| {
        EntryPoint::new(Arc::clone(&contract), "buy", move |_| Ok(result.clone()))
            .expect("entry point")
            .handle(br#"{"colour": "red"}"#)
    };

    assert_eq!(respond(json!({"value": 10})).expect("value branch"), json!({"value": 10}));
    assert_eq!(respond(json!({"error": "bad"})).expect("error branch"), json!({"error": "bad"}));
    let err = respond(json!({"value": "x"})).unwrap_err();
    assert!(matches!(err, SkyhookError::ContractViolation { .. }));

    let returns = contract.function("buy").expect("buy").returns().expect("returns");
    assert_eq!(returns.select_alternative(&json!({"error": "bad"})).expect("valid"), Some(1));
}

#[test]
fn client_and_dispatcher_round_trip() {
    let contract = calculator();
    let dispatcher = Dispatcher::new(Arc::clone(&contract))
        .with_function("add", |arguments| {
            let a = arguments["a"].as_i64().unwrap_or_default();
            let b = arguments["b"].as_i64().unwrap_or_default();
            Ok(json!(a + b))
        })
        .expect("register add");
    assert!(dispatcher.missing().is_empty());

    let client = Client::new(contract, dispatcher);
    let bindings = Bindings::new().with_function("add", "add");
    let value = client
        .call_with(&bindings, "add", args(json!({"a": 2, "b": 40})))
        .expect("round trip");
    assert_eq!(value, json!(42));
}

#[test]
fn remote_rejection_surfaces_as_remote_error() {
    let contract = calculator();
    let dispatcher = Dispatcher::new(Arc::clone(&contract))
        .with_function("add", |_| Err(SkyhookError::Handler("overflow".to_string())))
        .expect("register add");
    let client = Client::new(contract, dispatcher);
    let err = client
        .call_with(
            &Bindings::new().with_function("add", "add"),
            "add",
            args(json!({"a": 1, "b": 1})),
        )
        .unwrap_err();
    match err {
        SkyhookError::Remote { kind, message } => {
            assert_eq!(kind, "handler");
            assert!(message.contains("overflow"));
        }
        other => panic!("expected remote error, got {other}"),
    }
}

#[test]
fn resolution_is_deterministic() {
    let first = unicorn_shop();
    let second = unicorn_shop();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_value(&first).expect("serialize"),
        serde_json::to_value(&second).expect("serialize")
    );
    assert_eq!(first.fingerprint().expect("fp"), second.fingerprint().expect("fp"));
    assert_ne!(
        first.fingerprint().expect("fp"),
        calculator().interface().fingerprint().expect("fp")
    );
}
