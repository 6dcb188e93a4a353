use clap::{Parser, Subcommand, ValueEnum};
use livedb::validation::value_from_str;
use livedb::{Collection, Predicate, SortDescriptor, Store, Value};
use std::path::PathBuf;
use std::process;

/// livedb CLI: inspect the live collections of a data directory
#[derive(Parser)]
#[command(name = "livedb", version, about)]
struct Cli {
    /// Path to the data directory holding schema.yaml
    #[arg(long, env = "LIVEDB_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Seed file loaded on open (default: <data-dir>/seed.yaml when present)
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
}

#[derive(Subcommand)]
enum Command {
    /// Count the objects of a class
    Count {
        /// Class name
        class: String,
    },

    /// List the objects of a class
    List {
        /// Class name
        class: String,
        /// Equality filters (e.g. --filter name=rex)
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
        /// Sort by a property, optionally descending (e.g. --sort age:desc)
        #[arg(long = "sort")]
        sort: Vec<String>,
    },

    /// Aggregate a property over a class
    Aggregate {
        /// Class name
        class: String,
        /// Aggregate function
        op: AggregateOp,
        /// Property name
        property: String,
    },

    /// Print the description of every object of a class
    Describe {
        /// Class name
        class: String,
    },

    /// Show schema classes, object counts and the current version
    Status,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_sort(s: &str) -> SortDescriptor {
    match s.rsplit_once(':') {
        Some((property, "desc")) => SortDescriptor::descending(property),
        Some((property, "asc")) => SortDescriptor::new(property),
        _ => SortDescriptor::new(s),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn open_store(cli: &Cli) -> Result<Store, Box<dyn std::error::Error>> {
    let store = Store::open(&cli.data_dir)?;
    let seed = cli
        .seed
        .clone()
        .unwrap_or_else(|| cli.data_dir.join("seed.yaml"));
    if cli.seed.is_some() || seed.exists() {
        let created = livedb::seed::load_seed_file(&store, &seed)?;
        log::debug!("Loaded {created} seed objects from {}", seed.display());
    }
    Ok(store)
}

fn objects_json(collection: &Collection) -> livedb::Result<serde_json::Value> {
    let objects = collection
        .iter()?
        .map(|object| object.to_json())
        .collect::<livedb::Result<Vec<_>>>()?;
    Ok(serde_json::Value::Array(objects))
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&cli)?;

    match &cli.command {
        Command::Count { class } => {
            let count = store.objects(class)?.count()?;
            print_output(&serde_json::json!({ "class": class, "count": count }), &cli.format)?;
        }

        Command::List {
            class,
            filters,
            sort,
        } => {
            let object_schema = store.schema().class(class)?.clone();
            let mut predicate = Predicate::True;
            for (name, raw) in filters {
                let (_, prop) = object_schema.property(name)?;
                predicate = predicate.and(Predicate::eq(name, value_from_str(prop, raw)?));
            }
            let descriptors: Vec<SortDescriptor> = sort.iter().map(|s| parse_sort(s)).collect();
            let results = store
                .objects(class)?
                .filter(predicate)?
                .sorted(&descriptors)?;
            print_output(&objects_json(&results)?, &cli.format)?;
        }

        Command::Aggregate {
            class,
            op,
            property,
        } => {
            let objects = store.objects(class)?;
            let value = match op {
                AggregateOp::Min => objects.min(property)?,
                AggregateOp::Max => objects.max(property)?,
                AggregateOp::Sum => Some(objects.sum(property)?),
                AggregateOp::Avg => objects.average(property)?,
            };
            print_output(
                &serde_json::json!({
                    "class": class,
                    "property": property,
                    "value": value.unwrap_or(Value::Null).to_json(),
                }),
                &cli.format,
            )?;
        }

        Command::Describe { class } => {
            println!("{}", store.objects(class)?.description()?);
        }

        Command::Status => {
            let mut classes = serde_json::Map::new();
            for name in store.schema().class_names() {
                let count = store.objects(name)?.count()?;
                classes.insert(name.to_string(), serde_json::json!({ "count": count }));
            }
            print_output(
                &serde_json::json!({
                    "path": store.path().display().to_string(),
                    "version": store.version()?,
                    "contexts": store.database().context_count(),
                    "classes": classes,
                }),
                &cli.format,
            )?;
        }
    }

    Ok(())
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
