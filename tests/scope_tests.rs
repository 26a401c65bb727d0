mod common;

use model_factory::{
    Args, CallOptions, FactoryError, MemorySession, Model, ModelFactory, Phase, Registry, Result,
    ScopeOptions, Session, Value, for_model,
};
use std::collections::BTreeMap;

#[tokio::test]
async fn test_bar_baz_cascade_cleanup() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let factory = ModelFactory::new(common::registry()?, session.clone());

    factory
        .with_scope(|mf| {
            let db = db.clone();
            async move {
                let bar = mf.get("bar")?.call("new", Args::new()).await?.into_one()?;
                let baz = mf
                    .resolve("baz")?
                    .call("new", Args::new().model(&bar))
                    .await?
                    .into_one()?;

                assert_eq!(baz.get("bar_id"), bar.get("id"));
                assert_eq!(db.row_count("bar").await?, 1);
                assert_eq!(db.row_count("baz").await?, 1);
                assert_eq!(mf.tracked_count().await, 2);
                Ok(())
            }
        })
        .await?;

    assert_eq!(db.row_count("bar").await?, 0);
    assert_eq!(db.row_count("baz").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_exit_removal() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let factory = ModelFactory::new(common::registry()?, session.clone());

    let scope = factory.enter().await;
    let bars = scope.call("thing.new", Args::new()).await?.into_many();
    assert_eq!(bars.len(), 2);
    scope.call("thing.foo", Args::new().push(1)).await?;

    assert_eq!(session.count("foo").await?, 1);
    assert_eq!(session.count("bar").await?, 3);

    scope.exit().await?;
    assert_eq!(scope.phase().await, Phase::Closed);
    assert_eq!(session.count("foo").await?, 0);
    assert_eq!(session.count("bar").await?, 0);
    assert_eq!(db.row_count("bar").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_mid_session_delete() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let factory = ModelFactory::new(common::registry()?, session.clone());

    let scope = factory.enter().await;
    let bars = scope.call("thing.new", Args::new()).await?.into_many();
    let foo = scope.call("thing.foo", Args::new()).await?.into_one()?;

    session.delete(&bars[0]).await?;
    assert_eq!(session.count("bar").await?, 2);

    session.delete(&foo).await?;
    assert_eq!(session.count("foo").await?, 0);
    assert_eq!(session.count("bar").await?, 2);

    scope.exit().await?;
    assert_eq!(db.row_count("foo").await?, 0);
    assert_eq!(db.row_count("bar").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_delete_then_reinsert_same_key_is_still_swept() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let mut registry = Registry::new();
    registry.register_at("bar").factory(|args: &Args| {
        Ok(Model::new("bar")
            .with("id", args.i64(0)?)
            .with("name", args.text(1)?))
    })?;
    let factory = ModelFactory::new(registry, session.clone());

    let scope = factory.enter().await;
    let original = scope
        .call("bar.new", Args::new().push(5).push("orig"))
        .await?
        .into_one()?;
    assert_eq!(db.row_count("bar").await?, 1);

    session.delete(&original).await?;
    session.flush().await?;
    session
        .add(&Model::new("bar").with("id", 5).with("name", "replacement"))
        .await?;
    session.flush().await?;

    scope.exit().await?;
    assert_eq!(db.rows("bar").await?, Vec::new());
    Ok(())
}

#[tokio::test]
async fn test_untracked_rows_are_swept() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let factory = ModelFactory::new(common::registry()?, session.clone());

    let scope = factory.enter().await;
    scope.call("bar.new", Args::new()).await?;

    let stray = Model::new("bar").with("name", "stray");
    session.add(&stray).await?;
    session.commit().await?;
    assert_eq!(db.row_count("bar").await?, 2);
    assert_eq!(scope.tracked_count().await, 1);

    scope.exit().await?;
    assert_eq!(db.row_count("bar").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_cleanup_disabled_keeps_rows() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let factory = ModelFactory::new(common::registry()?, session.clone())
        .with_options(ScopeOptions::new().cleanup(false));

    factory
        .with_scope(|mf| async move {
            let bar = mf.call("bar.new", Args::new()).await?.into_one()?;
            mf.call("baz.new", Args::new().model(&bar)).await?;
            Ok(())
        })
        .await?;

    assert_eq!(db.row_count("bar").await?, 1);
    assert_eq!(db.row_count("baz").await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_scope_commit_false_never_commits() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let factory = ModelFactory::new(common::registry()?, session.clone())
        .with_options(ScopeOptions::new().commit(false));

    let scope = factory.enter().await;
    let commit = CallOptions::new().commit(true);
    let bar = scope
        .call_with("bar.new", Args::new(), commit)
        .await?
        .into_one()?;
    assert!(!bar.get("id").is_null());
    scope.call_with("bar.new", Args::new(), commit).await?;

    assert_eq!(session.stats().await.commits, 0);
    assert_eq!(db.row_count("bar").await?, 0);
    scope.exit().await?;
    assert_eq!(session.stats().await.commits, 0);

    let session = MemorySession::new(db.clone());
    let factory = ModelFactory::new(common::registry()?, session.clone());
    let scope = factory.enter().await;
    scope.call_with("bar.new", Args::new(), commit).await?;
    scope.call_with("bar.new", Args::new(), commit).await?;
    assert_eq!(session.stats().await.commits, 2);
    assert_eq!(db.row_count("bar").await?, 2);
    scope.exit().await?;
    assert_eq!(db.row_count("bar").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_per_call_commit_false_only_flushes() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let mut registry = Registry::new();
    registry
        .register_at("bar")
        .commit(false)
        .method(common::new_bar())?;
    let factory = ModelFactory::new(registry, session.clone());

    let scope = factory.enter().await;
    let bar = scope.call("bar.new", Args::new()).await?.into_one()?;
    assert!(!bar.get("id").is_null());
    assert_eq!(db.row_count("bar").await?, 0);

    // the per-call override beats the method default
    scope
        .call_with("bar.new", Args::new(), CallOptions::new().commit(true))
        .await?;
    assert_eq!(db.row_count("bar").await?, 1);

    scope.exit().await?;
    assert_eq!(db.row_count("bar").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_merge_returns_canonical_instance() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let mut registry = Registry::new();
    registry.register_at("bar").merge(true).factory(|args: &Args| {
        Ok(Model::new("bar")
            .with("id", args.i64(0)?)
            .with("name", args.text(1)?))
    })?;
    let factory = ModelFactory::new(registry, session.clone());

    let scope = factory.enter().await;
    let first = scope
        .call("bar.new", Args::new().push(5).push("first"))
        .await?
        .into_one()?;
    let second = scope
        .call("bar.new", Args::new().push(5).push("second"))
        .await?
        .into_one()?;

    assert!(first.same_instance(&second));
    assert_eq!(first.get("name"), Value::from("second"));
    assert_eq!(db.row_count("bar").await?, 1);

    scope.exit().await?;
    assert_eq!(db.row_count("bar").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_merge_collection_with_shared_key() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let mut registry = Registry::new();
    registry.register_at("bar").merge(true).factory(|_| {
        Ok(vec![
            Model::new("bar").with("id", 7).with("name", "a"),
            Model::new("bar").with("id", 7).with("name", "b"),
        ])
    })?;
    let factory = ModelFactory::new(registry, session.clone());

    let scope = factory.enter().await;
    let bars = scope.call("bar.new", Args::new()).await?.into_many();
    assert_eq!(bars.len(), 2);
    assert!(bars[0].same_instance(&bars[1]));
    assert_eq!(bars[0].get("name"), Value::from("b"));
    assert_eq!(db.row_count("bar").await?, 1);
    assert_eq!(scope.tracked_count().await, 1);

    scope.exit().await?;
    assert_eq!(db.row_count("bar").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_factory_error_leaves_scope_active() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let mut registry = common::registry()?;
    registry
        .register_at("broken")
        .factory(|_| -> Result<Model> { Err(FactoryError::custom("factory exploded")) })?;
    let factory = ModelFactory::new(registry, session.clone());

    let scope = factory.enter().await;
    let err = scope.call("broken.new", Args::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "factory exploded");
    assert_eq!(scope.phase().await, Phase::Active);
    assert_eq!(scope.tracked_count().await, 0);

    // a missing argument is the factory's own error
    let err = scope.call("baz.new", Args::new()).await.unwrap_err();
    assert!(matches!(err, FactoryError::Argument(_)));

    scope.call("bar.new", Args::new()).await?;
    assert_eq!(scope.tracked_count().await, 1);
    scope.exit().await?;
    assert_eq!(db.row_count("bar").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_closed_scope_rejects_calls() -> Result<()> {
    let db = common::database().await?;
    let factory = ModelFactory::new(common::registry()?, MemorySession::new(db));

    let scope = factory.enter().await;
    scope.exit().await?;

    let err = scope.call("bar.new", Args::new()).await.unwrap_err();
    assert!(matches!(err, FactoryError::ScopeClosed(_)));
    let err = scope.exit().await.unwrap_err();
    assert!(matches!(err, FactoryError::ScopeClosed(_)));
    Ok(())
}

#[tokio::test]
async fn test_with_scope_exits_after_body_error() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let factory = ModelFactory::new(common::registry()?, session);

    let result: Result<()> = factory
        .with_scope(|mf| async move {
            mf.call("bar.new", Args::new()).await?;
            Err(FactoryError::custom("test body failed"))
        })
        .await;

    assert_eq!(result.unwrap_err().to_string(), "test body failed");
    assert_eq!(db.row_count("bar").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_cleanup_leaves_scope_draining() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let factory = ModelFactory::new(common::registry()?, session.clone());

    let scope = factory.enter().await;
    let foo = scope.call("thing.foo", Args::new()).await?.into_one()?;
    let newer_bar = scope.call("bar.new", Args::new()).await?.into_one()?;

    // an older row now restricts the deletion of a newer one
    foo.relate("bar", &newer_bar);
    session.commit().await?;
    assert_eq!(foo.get("bar_id"), newer_bar.get("id"));

    let err = scope.exit().await.unwrap_err();
    assert!(matches!(err, FactoryError::ConstraintViolation(_)), "{}", err);
    assert_eq!(scope.phase().await, Phase::Draining);
    assert_eq!(db.row_count("bar").await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_with_scope_reports_both_failures() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let factory = ModelFactory::new(common::registry()?, session.clone());

    let result: Result<()> = factory
        .with_scope(|mf| {
            let session = session.clone();
            async move {
                let foo = mf.call("thing.foo", Args::new()).await?.into_one()?;
                let newer_bar = mf.call("bar.new", Args::new()).await?.into_one()?;
                foo.relate("bar", &newer_bar);
                session.commit().await?;
                Err(FactoryError::custom("body failed"))
            }
        })
        .await;

    match result {
        Err(FactoryError::ScopeFailed { body, cleanup }) => {
            assert_eq!(body.to_string(), "body failed");
            assert!(matches!(*cleanup, FactoryError::ConstraintViolation(_)));
        }
        other => panic!("expected ScopeFailed, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_nested_namespace_scenario() -> Result<()> {
    let db = common::database().await?;
    let mut registry = Registry::new();
    registry.register("name.space.nesting", "new", common::new_bar())?;
    let factory = ModelFactory::new(registry, MemorySession::new(db.clone()));

    factory
        .with_scope(|mf| async move {
            let bar = mf
                .resolve("name.space.nesting")?
                .call("new", Args::new())
                .await?
                .into_one()?;
            assert_eq!(bar.table(), "bar");

            let err = mf
                .resolve("name.space")?
                .call("new", Args::new())
                .await
                .unwrap_err();
            assert!(matches!(err, FactoryError::NotCallable { .. }));
            let message = err.to_string();
            assert!(message.contains("methods include: N/A"), "{}", message);
            assert!(message.contains("namespaces include: nesting"), "{}", message);
            Ok(())
        })
        .await?;

    assert_eq!(db.row_count("bar").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_for_model_factory_in_scope() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::new(db.clone());
    let mut registry = Registry::new();
    registry.register(
        "thing",
        "new",
        for_model("bar", |args| {
            Ok(BTreeMap::from([(
                "name".to_string(),
                args.named_value("name")?.unwrap_or(Value::from("default")),
            )]))
        }),
    )?;
    let factory = ModelFactory::new(registry, session);

    factory
        .with_scope(|mf| async move {
            let bar = mf
                .call("thing.new", Args::new().named("name", "given"))
                .await?
                .into_one()?;
            assert_eq!(bar.table(), "bar");
            assert_eq!(bar.get("name"), Value::from("given"));
            assert_eq!(bar.get("id"), Value::Integer(1));
            Ok(())
        })
        .await?;
    assert_eq!(db.row_count("bar").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_explicit_begin_session() -> Result<()> {
    let db = common::database().await?;
    let session = MemorySession::with_explicit_begin(db.clone());
    let factory = ModelFactory::new(common::registry()?, session.clone());

    let scope = factory.enter().await;
    let bar = scope.call("bar.new", Args::new()).await?.into_one()?;
    scope.call("baz.new", Args::new().model(&bar)).await?;
    assert_eq!(db.row_count("baz").await?, 1);
    assert!(session.stats().await.begins >= 2);

    scope.exit().await?;
    assert_eq!(db.row_count("bar").await?, 0);
    assert_eq!(db.row_count("baz").await?, 0);
    Ok(())
}
