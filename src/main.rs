use clap::{Arg, Command};
use log::LevelFilter;
use postbox::form::FORM_MARKER;
use postbox::{
    FieldValue, Form, FormSchema, Method, Request, Retention, SiteContext, SqliteLog,
    SubmissionLog,
};
use std::collections::HashMap;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("postbox")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Contact-form processing: schema-driven validation, screening, delivery, and logging")
        .arg(
            Arg::new("schema")
                .short('c')
                .long("schema")
                .value_name("FILE")
                .help("Form schema file path")
                .default_value("postbox.yaml"),
        )
        .arg(
            Arg::new("generate-schema")
                .long("generate-schema")
                .value_name("FILE")
                .help("Generate a sample form schema file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-schema")
                .long("test-schema")
                .help("Test schema validity and list its fields")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("submission")
                .long("submission")
                .value_name("FILE")
                .help("Process a submission from a JSON parameter file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("log-db")
                .long("log-db")
                .value_name("FILE")
                .help("Submission log database path")
                .default_value("postbox.db"),
        )
        .arg(
            Arg::new("clean")
                .long("clean")
                .value_name("POLICY")
                .help("Apply a log retention policy: all, recent=N, or days=N")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("no-dns")
                .long("no-dns")
                .help("Skip DNS checks for email validation rules")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-schema") {
        generate_sample_schema(generate_path);
        return;
    }

    let log_db = matches.get_one::<String>("log-db").unwrap();

    if let Some(policy) = matches.get_one::<String>("clean") {
        clean_logs(log_db, policy).await;
        return;
    }

    let schema_path = matches.get_one::<String>("schema").unwrap();
    let schema = match FormSchema::from_file(schema_path) {
        Ok(schema) => schema,
        Err(e) => {
            eprintln!("Error loading schema: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-schema") {
        test_schema(&schema);
        return;
    }

    if let Some(submission_file) = matches.get_one::<String>("submission") {
        let ok = process_submission(
            schema,
            submission_file,
            log_db,
            matches.get_flag("no-dns"),
        )
        .await;

        if !ok {
            process::exit(1);
        }

        return;
    }

    eprintln!("Nothing to do; see --help");
    process::exit(1);
}

fn generate_sample_schema(path: &str) {
    let schema = FormSchema::sample();

    match schema.to_file(path) {
        Ok(()) => println!("Sample schema written to: {path}"),
        Err(e) => {
            eprintln!("Error writing schema: {e}");
            process::exit(1);
        }
    }
}

fn test_schema(schema: &FormSchema) {
    println!("Testing schema...");
    println!();
    println!("Form id: {}", schema.id);
    println!("Method: {:?}", schema.method);
    println!("Number of fields: {}", schema.fields.len());

    for field in &schema.fields {
        let mut notes = Vec::new();

        if field.required {
            notes.push("required".to_string());
        }

        if field.exclude {
            notes.push("excluded".to_string());
        }

        for rule in &field.validate {
            notes.push(rule.name().to_string());
        }

        if postbox::reserved::is_reserved(&field.name) {
            notes.push("RESERVED NAME, will be skipped".to_string());
        }

        println!("  Field '{}': {}", field.name, notes.join(", "));
    }

    println!();
    println!("Schema is valid");
}

async fn process_submission(schema: FormSchema, path: &str, log_db: &str, no_dns: bool) -> bool {
    let params = match load_params(path) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("Error loading submission: {e}");
            process::exit(1);
        }
    };

    let store = match SqliteLog::open(log_db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error opening submission log: {e}");
            process::exit(1);
        }
    };

    let method = schema.method;
    let mut form = Form::from_schema(schema, SiteContext::default());
    form.store(Arc::new(store));

    if no_dns {
        form.dns_checks(false);
    }

    let mut request = Request::new();

    for (name, value) in params {
        request = match method {
            Method::Get => request.get_param(name, value),
            Method::Post => request.post_param(name, value),
        };
    }

    // Mark the request as belonging to this form, as the host page would.
    request = match method {
        Method::Get => request.get_param(FORM_MARKER, form.id().to_string()),
        Method::Post => request.post_param(FORM_MARKER, form.id().to_string()),
    };

    let sent = form.submit(&request).await;

    if sent {
        println!("Submission accepted and message delivered");
        return true;
    }

    if form.failed() {
        println!("Submission accepted but delivery failed");
        return false;
    }

    println!("Submission rejected:");

    let mut errors: Vec<_> = form.error_map().iter().collect();
    errors.sort();

    for (field, message) in errors {
        println!("  {field}: {message}");
    }

    false
}

fn load_params(path: &str) -> anyhow::Result<HashMap<String, FieldValue>> {
    let content = std::fs::read_to_string(path)?;
    let params: HashMap<String, FieldValue> = serde_json::from_str(&content)?;
    Ok(params)
}

async fn clean_logs(log_db: &str, policy: &str) {
    let retention = match parse_retention(policy) {
        Some(retention) => retention,
        None => {
            eprintln!("Invalid retention policy: {policy} (expected all, recent=N, or days=N)");
            process::exit(1);
        }
    };

    let store = match SqliteLog::open(log_db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error opening submission log: {e}");
            process::exit(1);
        }
    };

    match store.clean(retention).await {
        Ok(deleted) => {
            let noun = if deleted == 1 { "entry" } else { "entries" };
            println!("Deleted {deleted} log {noun}");
        }
        Err(e) => {
            eprintln!("Error cleaning submission log: {e}");
            process::exit(1);
        }
    }
}

fn parse_retention(policy: &str) -> Option<Retention> {
    if policy == "all" {
        return Some(Retention::All);
    }

    if let Some(limit) = policy.strip_prefix("recent=") {
        return limit.parse().ok().map(Retention::KeepRecent);
    }

    if let Some(days) = policy.strip_prefix("days=") {
        return days.parse().ok().map(Retention::MaxAgeDays);
    }

    None
}
