#![allow(dead_code)]

use model_factory::{
    Args, Column, DataType, Database, ForeignKey, Method, Model, OnDelete, Registry, Result,
    TableSchema,
};

/// `bar(id, name)`, `baz(id, bar_id -> bar ON DELETE CASCADE)` and
/// `foo(id, bar_id -> bar ON DELETE RESTRICT)`.
pub async fn database() -> Result<Database> {
    let db = Database::new();
    db.create_table(
        TableSchema::new("bar")
            .column(Column::new("id", DataType::Integer).primary_key().autoincrement())
            .column(Column::new("name", DataType::Text)),
    )
    .await?;
    db.create_table(
        TableSchema::new("baz")
            .column(Column::new("id", DataType::Integer).primary_key().autoincrement())
            .column(Column::new("bar_id", DataType::Integer).not_null())
            .foreign_key(
                ForeignKey::new("bar_id", "bar", "id")
                    .relation("bar")
                    .on_delete(OnDelete::Cascade),
            ),
    )
    .await?;
    db.create_table(
        TableSchema::new("foo")
            .column(Column::new("id", DataType::Integer).primary_key().autoincrement())
            .column(Column::new("bar_id", DataType::Integer).not_null())
            .foreign_key(ForeignKey::new("bar_id", "bar", "id").relation("bar")),
    )
    .await?;
    Ok(db)
}

pub fn new_bar() -> Method {
    Method::new(|args: &Args| {
        let bar = Model::new("bar");
        if let Some(name) = args.named_value("name")? {
            bar.set("name", name);
        }
        Ok(bar)
    })
}

pub fn new_baz() -> Method {
    Method::new(|args: &Args| Ok(Model::new("baz").with_relation("bar", &args.model_at(0)?)))
}

/// `bar.new`, `baz.new(bar)`, `thing.new -> [bar, bar]`, `thing.foo -> foo(bar)`.
pub fn registry() -> Result<Registry> {
    let mut registry = Registry::new();
    registry.register("bar", "new", new_bar())?;
    registry.register("baz", "new", new_baz())?;
    registry
        .register_at("thing")
        .factory(|_| Ok(vec![Model::new("bar"), Model::new("bar")]))?;
    registry
        .register_at("thing")
        .name("foo")
        .factory(|_| Ok(Model::new("foo").with_relation("bar", &Model::new("bar"))))?;
    Ok(registry)
}
