use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use model_factory::{
    Args, Database, Declaration, FactoryError, Fixture, Method, Model, ScopeOptions, autoincrement,
    namespace::Node,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "model-factory")]
#[command(about = "Inspect and exercise a demo model factory registry")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the demo namespace tree
    Tree,
    /// Run the demo scope and report row counts
    Run {
        /// Flush only; never commit
        #[arg(long)]
        no_commit: bool,
        /// Leave produced rows behind on exit
        #[arg(long)]
        no_cleanup: bool,
        /// Use a session that requires begin() before writes
        #[arg(long)]
        explicit_begin: bool,
        #[command(flatten)]
        demo: DemoArgs,
    },
}

#[derive(clap::Args)]
struct DemoArgs {
    /// JSON array of table schemas; must define the bar and baz tables the demo uses
    #[arg(long)]
    schema: Option<PathBuf>,
    /// Print committed rows as JSON next to the counts
    #[arg(long)]
    dump: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Tree => {
            let registry = demo_declaration().into_registry()?;
            print!("{}", Node::build(&registry).render());
            Ok(())
        }
        Command::Run {
            no_commit,
            no_cleanup,
            explicit_begin,
            demo,
        } => {
            let options = ScopeOptions::new().commit(!no_commit).cleanup(!no_cleanup);
            run_demo(options, explicit_begin, &demo).await
        }
    }
}

fn demo_declaration() -> Declaration {
    Declaration::new()
        .namespace("bar", |bar| {
            bar.method(
                "new",
                autoincrement(1, |_, n| Ok(Model::new("bar").with("name", format!("bar-{}", n)))),
            )
        })
        .namespace("baz", |baz| {
            baz.method(
                "new",
                Method::new(|args: &Args| Ok(Model::new("baz").with_relation("bar", &args.model_at(0)?))),
            )
        })
        .namespace("name", |name| {
            name.namespace("space", |space| {
                space.namespace("nesting", |nesting| {
                    nesting.method("new", Method::new(|_| Ok(Model::new("bar").with("name", "nested"))))
                })
            })
        })
}

const DEMO_SCHEMA: &str = r#"[
    {"name": "bar", "columns": [
        {"name": "id", "data_type": "Integer", "primary_key": true, "nullable": false, "autoincrement": true},
        {"name": "name", "data_type": "Text"}
    ]},
    {"name": "baz", "columns": [
        {"name": "id", "data_type": "Integer", "primary_key": true, "nullable": false, "autoincrement": true},
        {"name": "bar_id", "data_type": "Integer", "nullable": false}
    ], "foreign_keys": [
        {"column": "bar_id", "references_table": "bar", "references_column": "id",
         "relation": "bar", "on_delete": "Cascade"}
    ]}
]"#;

async fn demo_database(schema: Option<&PathBuf>) -> Result<Database> {
    let json = match schema {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading schema {}", path.display()))?,
        None => DEMO_SCHEMA.to_string(),
    };
    let db = Database::new();
    db.create_tables_from_json(&json).await?;
    Ok(db)
}

async fn print_counts(db: &Database, label: &str, dump: bool) -> Result<()> {
    for table in db.table_names().await {
        let count = db.row_count(&table).await?;
        println!("{:<8} {:<6} {}", label, table, count);
        if dump {
            for row in db.rows(&table).await? {
                println!("{:<8} {:<6} {}", "", "", serde_json::to_string(&row)?);
            }
        }
    }
    Ok(())
}

async fn run_demo(options: ScopeOptions, explicit_begin: bool, demo: &DemoArgs) -> Result<()> {
    let db = demo_database(demo.schema.as_ref()).await?;
    let mut fixture = Fixture::new(db.clone(), demo_declaration().into_registry()?).options(options);
    if explicit_begin {
        fixture = fixture.explicit_begin();
    }

    let session = fixture.session().clone();
    let dump = demo.dump;
    fixture
        .run(|scope| {
            let db = db.clone();
            async move {
                let bar = scope.call("bar.new", Args::new()).await?.into_one()?;
                scope.call("baz.new", Args::new().model(&bar)).await?;
                scope.call("name.space.nesting.new", Args::new()).await?;
                println!("tracked  {}", scope.tracked_count().await);
                print_counts(&db, "during", dump).await?;
                Ok::<_, FactoryError>(())
            }
        })
        .await
        .context("demo scope failed")?;

    print_counts(&db, "after", demo.dump).await?;
    let stats = session.stats().await;
    println!(
        "session  begins={} commits={} rollbacks={} flushes={}",
        stats.begins, stats.commits, stats.rollbacks, stats.flushes
    );
    Ok(())
}
