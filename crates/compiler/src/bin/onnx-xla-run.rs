//! ONNX-XLA Model Runner
//!
//! Inspects and executes ONNX models on the onnx-xla backend
//!
//! # Usage
//!
//! ```bash
//! # Show backend information
//! onnx-xla-run info
//!
//! # List the operators a model uses and whether each is supported
//! onnx-xla-run ops model.onnx
//!
//! # Run with explicit input values, others filled with a pattern
//! onnx-xla-run run model.onnx --input x=1,-2,3,-4 --fill range --json
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use onnx_xla_compiler::utils::primitive_type;
use onnx_xla_compiler::{
    init_logging, BackendConfig, GraphIR, Literal, OperatorRegistry, Translator, ONNX_IR_VERSION,
    ONNX_OPSET_VERSION,
};
use onnx_xla_engine::PrimitiveType;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// ONNX-XLA Model Runner - inspect and execute ONNX models
#[derive(Parser)]
#[command(name = "onnx-xla-run")]
#[command(about = "Run ONNX models on the onnx-xla backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show backend information
    Info,

    /// List operators used by a model
    Ops {
        /// Path to ONNX model file
        model: PathBuf,
    },

    /// Translate and execute a model
    Run {
        /// Path to ONNX model file
        model: PathBuf,

        /// Input values as name=v1,v2,... (repeatable)
        #[arg(short, long)]
        input: Vec<String>,

        /// Pattern for inputs not given with --input
        #[arg(short, long, default_value = "zeros")]
        fill: Fill,

        /// Print outputs as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Fill {
    Zeros,
    Ones,
    Range,
}

fn main() {
    let config = match BackendConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(&config.log_filter);

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Info => show_info(&config),
        Commands::Ops { model } => show_ops(&model),
        Commands::Run {
            model,
            input,
            fill,
            json,
        } => run(&model, &input, fill, json),
    };
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn show_info(config: &BackendConfig) -> Result<()> {
    println!("📋 Backend Information");
    println!("======================");
    println!("Name:            {}", config.name);
    println!("Vendor:          {}", config.vendor);
    println!("Version:         {}", config.version);
    println!("Device:          {}", config.device);
    println!("ONNX IR version: {}", ONNX_IR_VERSION);
    println!("Opset version:   {}", ONNX_OPSET_VERSION);
    println!("Max graph size:  {}", config.max_graph_size);
    println!("Max graph count: {}", config.max_graph_count);

    let kinds = OperatorRegistry::global().kinds();
    println!();
    println!("Operators ({}):", kinds.len());
    for kind in kinds {
        println!("  {}", kind);
    }
    Ok(())
}

fn load(model: &Path) -> Result<GraphIR> {
    let bytes = fs::read(model).with_context(|| format!("reading {}", model.display()))?;
    let ir = GraphIR::from_bytes(&bytes).with_context(|| format!("ingesting {}", model.display()))?;
    debug!(nodes = ir.nodes().len(), "model ingested");
    Ok(ir)
}

fn show_ops(model: &Path) -> Result<()> {
    let ir = load(model)?;
    let registry = OperatorRegistry::global();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for node in ir.nodes() {
        *counts.entry(node.kind.as_str()).or_default() += 1;
    }

    println!("Graph '{}' (IR {}, opset {})", ir.name(), ir.ir_version(), ir.opset_version());
    let mut unsupported = 0;
    for kind in ir.operator_kinds() {
        let supported = registry.is_registered(kind);
        if !supported {
            unsupported += 1;
        }
        println!(
            "  {} {:<20} x{}",
            if supported { "✓" } else { "✗" },
            kind,
            counts.get(kind).copied().unwrap_or(0)
        );
    }
    if unsupported > 0 {
        println!("{} operator kind(s) are not supported", unsupported);
    }
    Ok(())
}

fn parse_inputs(specs: &[String]) -> Result<HashMap<String, Vec<f64>>> {
    let mut values = HashMap::new();
    for spec in specs {
        let (name, list) = spec
            .split_once('=')
            .ok_or_else(|| anyhow!("input '{}' is not name=v1,v2,...", spec))?;
        let parsed = list
            .split(',')
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().parse::<f64>().with_context(|| format!("value '{}' of '{}'", v, name)))
            .collect::<Result<Vec<_>>>()?;
        values.insert(name.to_string(), parsed);
    }
    Ok(values)
}

fn fill_values(fill: Fill, count: usize) -> Vec<f64> {
    match fill {
        Fill::Zeros => vec![0.0; count],
        Fill::Ones => vec![1.0; count],
        Fill::Range => (0..count).map(|i| i as f64).collect(),
    }
}

fn run(model: &Path, input: &[String], fill: Fill, json: bool) -> Result<()> {
    let ir = load(model)?;
    let mut given = parse_inputs(input)?;
    let executor = Translator::new(ir).translate(&[])?;

    let mut arguments = Vec::with_capacity(executor.input_count());
    for name in executor.input_names() {
        let metadata = executor
            .metadata(name)
            .ok_or_else(|| anyhow!("no metadata for input '{}'", name))?;
        let count = metadata.dims.iter().product::<i64>() as usize;
        let values = match given.remove(name) {
            Some(values) if values.len() == count => values,
            Some(values) => bail!("input '{}' needs {} values, got {}", name, count, values.len()),
            None => fill_values(fill, count),
        };
        let literal = Literal::from_vec(metadata.dims.clone(), values)?.convert(primitive_type(metadata.data_type)?)?;
        arguments.push(literal);
    }
    if let Some(name) = given.keys().next() {
        bail!("model has no runtime input '{}'", name);
    }

    let outputs = executor.execute_literals(&arguments)?;
    if json {
        let mut object = serde_json::Map::new();
        for (name, literal) in executor.output_names().iter().zip(&outputs) {
            let values = literal.convert(PrimitiveType::F64)?.to_vec::<f64>()?;
            object.insert(
                name.clone(),
                serde_json::json!({ "dims": literal.dims(), "values": values }),
            );
        }
        println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(object))?);
    } else {
        for (name, literal) in executor.output_names().iter().zip(&outputs) {
            println!("{} = {}", name, literal);
        }
    }
    Ok(())
}
