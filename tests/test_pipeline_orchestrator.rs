//! Chat turn scenarios for the pipeline orchestrator
//!
//! Tests observable outcomes of a turn:
//! - The data payload folded through the chain
//! - The message saved to the chat history, on success and on failure
//! - What gets persisted for each component
//! - Capability calls attributed to the running component


use composer_engine::capability::{CompletionCall, CompletionError};
use composer_engine::error::ErrorKind;
use composer_engine::store::StoreError;
use composer_engine::testing::mocks::{MockCompletionClient, MockStateStore};
use serde_json::json;
use std::sync::Arc;
use test_helpers::{component, mapping, orchestrator, snapshot};

fn idle_client() -> Arc<MockCompletionClient> {
    Arc::new(MockCompletionClient::single_response("unused"))
}

#[tokio::test]
async fn test_two_component_chain_produces_reply() {
    let store = Arc::new(MockStateStore::new().with_pipeline(
        1,
        snapshot(vec![
            component(10, "A", "f", "fn f(msg, data) { #{ x: 1 } }"),
            component(
                11,
                "B",
                "g",
                r#"fn g(msg, data) { data.api_message = `got ${data.x}`; data }"#,
            ),
        ]),
    ));
    let orchestrator = orchestrator(store.clone(), idle_client());

    let mut components = store.pipelines[&1].components.clone();
    let data = orchestrator
        .run(1, Default::default(), &mut components, "hello")
        .await
        .unwrap();
    assert_eq!(data, mapping(json!({"x": 1, "api_message": "got 1"})));

    let outcome = orchestrator.chat_send(1, "hello").await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.api_message, "got 1");

    let chats = store.saved_chats().await;
    let (pipeline_id, turn) = chats.last().unwrap();
    assert_eq!(*pipeline_id, 1);
    assert_eq!(turn.user_message, "hello");
    assert_eq!(turn.api_message, "got 1");
}

#[tokio::test]
async fn test_missing_entrypoint_is_saved_as_reply() {
    let store = Arc::new(MockStateStore::new().with_pipeline(
        1,
        snapshot(vec![component(
            10,
            "Greeter",
            "greet",
            "fn hello(msg, data) { data }",
        )]),
    ));

    let outcome = orchestrator(store.clone(), idle_client())
        .chat_send(1, "hi")
        .await
        .unwrap();

    assert_eq!(outcome.failure, Some(ErrorKind::MissingEntrypoint));
    let chats = store.saved_chats().await;
    assert_eq!(chats.len(), 1);
    assert!(chats[0].1.api_message.contains("MissingEntrypoint"));
    assert!(chats[0].1.api_message.contains("Greeter"));
}

#[tokio::test]
async fn test_state_save_http_error_body_is_saved_as_reply() {
    let store = Arc::new(
        MockStateStore::new()
            .with_pipeline(
                1,
                snapshot(vec![component(10, "Echo", "echo", "fn echo(m, d) { d }")]),
            )
            .with_save_states_failure(
                10,
                StoreError::Http {
                    status: 422,
                    body: r#"{"detail": "state must be smaller than 1MB"}"#.to_string(),
                },
            ),
    );

    let outcome = orchestrator(store.clone(), idle_client())
        .chat_send(1, "hi")
        .await
        .unwrap();

    assert_eq!(outcome.failure, Some(ErrorKind::RemoteSave));
    assert_eq!(
        store.saved_chats().await[0].1.api_message,
        "state must be smaller than 1MB"
    );
}

#[tokio::test]
async fn test_plain_text_error_body_is_saved_verbatim() {
    let store = Arc::new(
        MockStateStore::new()
            .with_pipeline(
                1,
                snapshot(vec![component(10, "Echo", "echo", "fn echo(m, d) { d }")]),
            )
            .with_save_states_failure(
                10,
                StoreError::Http {
                    status: 502,
                    body: "Bad Gateway".to_string(),
                },
            ),
    );

    orchestrator(store.clone(), idle_client())
        .chat_send(1, "hi")
        .await
        .unwrap();

    assert_eq!(store.saved_chats().await[0].1.api_message, "Bad Gateway");
}

#[tokio::test]
async fn test_contract_violation_keeps_earlier_component_saves() {
    let store = Arc::new(MockStateStore::new().with_pipeline(
        1,
        snapshot(vec![
            component(
                10,
                "Memory",
                "remember",
                r#"fn remember(m, d) { this.state.last = m; this.pstate.turns = 1; d }"#,
            ),
            component(
                11,
                "Broken",
                "run",
                r#"fn run(m, d) { this.state = 5; this.pstate.turns = 99; d }"#,
            ),
        ]),
    ));

    let outcome = orchestrator(store.clone(), idle_client())
        .chat_send(1, "hi")
        .await
        .unwrap();

    assert_eq!(outcome.failure, Some(ErrorKind::InvalidComponentContract));
    assert!(outcome.api_message.contains("Broken"));

    let saved = store.saved_states().await;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, 10);
    assert_eq!(saved[0].1.state, mapping(json!({"last": "hi"})));
    assert_eq!(saved[0].1.pstate, mapping(json!({"turns": 1})));
}

#[tokio::test]
async fn test_every_component_runs_when_reply_is_set_early() {
    let store = Arc::new(MockStateStore::new().with_pipeline(
        1,
        snapshot(vec![
            component(
                10,
                "Early",
                "run",
                r#"fn run(m, d) { #{ api_message: "early" } }"#,
            ),
            component(
                11,
                "Late",
                "run",
                r#"fn run(m, d) { d.api_message += " then late"; d }"#,
            ),
        ]),
    ));

    let outcome = orchestrator(store.clone(), idle_client())
        .chat_send(1, "hi")
        .await
        .unwrap();

    assert_eq!(outcome.api_message, "early then late");
    assert_eq!(store.saved_states().await.len(), 2);
}

#[tokio::test]
async fn test_unknown_pipeline_fails_without_saving_chat() {
    let store = Arc::new(MockStateStore::new());

    let err = orchestrator(store.clone(), idle_client())
        .chat_send(404, "hi")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RemoteFetch);
    assert!(store.saved_chats().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_capability_call_is_attributed_to_running_component() {
    let client = Arc::new(MockCompletionClient::single_response("Bonjour!"));
    let store = Arc::new(MockStateStore::new().with_pipeline(
        1,
        snapshot(vec![
            component(10, "Passthrough", "run", "fn run(m, d) { d }"),
            component(
                11,
                "Translator",
                "translate",
                r#"
                fn translate(message, data) {
                    let reply = oai::chatcmpl_with_messages([
                        #{ role: "system", content: "Translate to French" },
                        #{ role: "user", content: message }
                    ]);
                    #{ api_message: reply.choices[0].message.content }
                }
                "#,
            ),
        ]),
    ));

    let outcome = orchestrator(store.clone(), client.clone())
        .chat_send(1, "Hello!")
        .await
        .unwrap();

    assert_eq!(outcome.api_message, "Bonjour!");

    let calls = client.calls().await;
    assert_eq!(calls.len(), 1);
    let (component_id, call, body) = &calls[0];
    assert_eq!(*component_id, 11);
    assert_eq!(*call, CompletionCall::WithMessages);
    assert_eq!(
        body,
        &json!({
            "messages": [
                {"role": "system", "content": "Translate to French"},
                {"role": "user", "content": "Hello!"}
            ]
        })
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_explicit_request_is_shaped_before_forwarding() {
    let client = Arc::new(MockCompletionClient::single_response("ok"));
    let store = Arc::new(MockStateStore::new().with_pipeline(
        1,
        snapshot(vec![component(
            10,
            "Explicit",
            "run",
            r#"
            fn run(message, data) {
                let reply = oai::chatcmpl(#{
                    deployment_id: "gpt-35",
                    model: "gpt-3.5-turbo",
                    messages: [#{ role: "user", content: message }],
                    temperature: 0.2
                });
                #{ api_message: reply.choices[0].message.content }
            }
            "#,
        )]),
    ));

    let outcome = orchestrator(store, client.clone())
        .chat_send(1, "hi")
        .await
        .unwrap();
    assert_eq!(outcome.api_message, "ok");

    let calls = client.calls().await;
    let (_, call, body) = &calls[0];
    assert_eq!(*call, CompletionCall::Request);
    assert_eq!(body["temperature"], json!(0.2));
    assert_eq!(body["max_tokens"], json!(2048));
    assert!(body.get("functions").is_none());
    assert!(body.get("function_call").is_none());
    assert!(body.get("stop").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_uncaught_completion_http_error_renders_remote_body() {
    let client = Arc::new(MockCompletionClient::with_failure(CompletionError::Http {
        status: 402,
        body: r#"{"detail": "Monthly token quota exhausted"}"#.to_string(),
    }));
    let store = Arc::new(MockStateStore::new().with_pipeline(
        1,
        snapshot(vec![component(
            10,
            "Chatty",
            "run",
            r#"fn run(m, d) { oai::chatcmpl_with_messages([#{ role: "user", content: m }]) }"#,
        )]),
    ));

    let outcome = orchestrator(store.clone(), client)
        .chat_send(1, "hi")
        .await
        .unwrap();

    assert_eq!(outcome.failure, Some(ErrorKind::ComponentRuntime));
    assert_eq!(outcome.api_message, "Monthly token quota exhausted");
    assert!(store.saved_states().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_component_can_catch_completion_failure() {
    let client = Arc::new(MockCompletionClient::with_failure(CompletionError::Http {
        status: 429,
        body: "rate limited".to_string(),
    }));
    let store = Arc::new(MockStateStore::new().with_pipeline(
        1,
        snapshot(vec![component(
            10,
            "Careful",
            "run",
            r#"
            fn run(m, d) {
                let reply = "unexpected";
                try {
                    oai::chatcmpl_with_messages([#{ role: "user", content: m }]);
                } catch (err) {
                    reply = `busy (${err.status}): ${err.body}`;
                }
                #{ api_message: reply }
            }
            "#,
        )]),
    ));

    let outcome = orchestrator(store, client).chat_send(1, "hi").await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.api_message, "busy (429): rate limited");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_binding_outside_a_component_run() {
    let client = Arc::new(MockCompletionClient::single_response("hi"));
    let store = Arc::new(MockStateStore::new().with_pipeline(
        1,
        snapshot(vec![component(
            10,
            "Chatty",
            "run",
            r#"fn run(m, d) { let r = oai::chatcmpl_with_messages([]); d }"#,
        )]),
    ));
    let orchestrator = orchestrator(store, client.clone());

    assert!(orchestrator.chat_send(1, "hi").await.unwrap().is_success());
    assert_eq!(client.calls().await.len(), 1);

    let err = orchestrator
        .runner()
        .engine()
        .eval::<rhai::Dynamic>("oai::chatcmpl_with_messages([])")
        .unwrap_err();
    assert!(err.to_string().contains("No component is bound"));
    assert_eq!(client.calls().await.len(), 1);
}
