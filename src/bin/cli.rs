//! BAW CLI
//!
//! Inspect, verify, load, upgrade and generate `.baw` containers.

use std::fs;
use std::path::{Path, PathBuf};

use baw::assets::{self, BoneHierarchy, Mesh, MeshOptions, VertexBuffer};
use baw::config::LoaderConfig;
use baw::format::legacy;
use baw::loader::BlobNode;
use baw::{
    Compression, Container, DecryptionKey, LoadParams, LoadRequest, LoadedObject, Loader,
    RootSelector, StandardHooks,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

/// BAW CLI
#[derive(Parser, Debug)]
#[command(name = "baw")]
#[command(about = "Typed-blob asset container tool")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the container layout and every blob header
    Inspect {
        file: PathBuf,
    },

    /// Decompress and check every blob against its integrity token
    Verify {
        file: PathBuf,

        /// Key material for encrypted blobs (repeatable, tried in order)
        #[arg(short, long)]
        key: Vec<String>,
    },

    /// Load a root blob and its dependencies with the stock types
    Load {
        file: PathBuf,

        /// Root handle (defaults to the first blob)
        #[arg(short, long)]
        root: Option<u64>,

        /// Key material for encrypted blobs (repeatable, tried in order)
        #[arg(short, long)]
        key: Vec<String>,

        /// Compute mesh bounds while loading
        #[arg(long)]
        bounds: bool,
    },

    /// Rewrite a version 1 container as the current version
    Upgrade {
        input: PathBuf,
        output: PathBuf,
    },

    /// Write a demo container of stock meshes
    Demo {
        output: PathBuf,

        #[arg(short, long, value_enum, default_value = "lz4")]
        compression: CompressionArg,

        /// Number of meshes sharing one vertex buffer and skeleton
        #[arg(short, long, default_value = "4")]
        meshes: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CompressionArg {
    Raw,
    Lz4,
    Lzma,
}

impl From<CompressionArg> for Compression {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::Raw => Compression::Raw,
            CompressionArg::Lz4 => Compression::Lz4,
            CompressionArg::Lzma => Compression::Lzma,
        }
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,baw=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let outcome = match args.command {
        Commands::Inspect { file } => inspect(&file),
        Commands::Verify { file, key } => verify(&file, &key),
        Commands::Load {
            file,
            root,
            key,
            bounds,
        } => load(&file, root, &key, bounds),
        Commands::Upgrade { input, output } => upgrade(&input, &output),
        Commands::Demo {
            output,
            compression,
            meshes,
        } => demo(&output, compression.into(), meshes),
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn hooks_with_keys(keys: &[String]) -> StandardHooks {
    keys.iter()
        .fold(StandardHooks::new(), |hooks, material| {
            hooks.with_key(DecryptionKey::derive(material.as_bytes()))
        })
}

fn type_name(tag: u32) -> &'static str {
    match tag {
        assets::VERTEX_BUFFER => "vertex_buffer",
        assets::BONE_HIERARCHY => "bone_hierarchy",
        assets::MESH => "mesh",
        _ => "?",
    }
}

fn inspect(file: &Path) -> baw::Result<bool> {
    let container = Container::open_path(file)?;

    println!("file:         {}", file.display());
    println!("version:      {}{}", container.version(), if container.was_upgraded() { " (upgraded)" } else { "" });
    println!("blobs:        {}", container.len());
    println!("payload base: {}", container.payload_base());
    println!("file size:    {}", container.file_size());
    println!();
    println!(
        "{:>20} {:>6} {:<15} {:<5} {:>3} {:>10} {:>10} {:>10}  token",
        "handle", "type", "name", "codec", "enc", "offset", "stored", "size"
    );

    for (header, offset) in container.headers().iter().zip(container.offsets()) {
        println!(
            "{:>20} {:>6} {:<15} {:<5} {:>3} {:>10} {:>10} {:>10}  {}",
            header.handle,
            header.blob_type,
            type_name(header.blob_type),
            header.compression.name(),
            if header.encrypted { "yes" } else { "no" },
            offset,
            header.compressed_size,
            header.decompressed_size,
            hex::encode(&header.integrity_token[..8]),
        );
    }
    Ok(true)
}

fn verify(file: &Path, keys: &[String]) -> baw::Result<bool> {
    let mut container = Container::open_path(file)?;
    let hooks = hooks_with_keys(keys);
    let config = LoaderConfig::default();

    let headers = container.headers().to_vec();
    let mut failures = 0usize;
    for header in headers {
        let stored = container.raw_bytes(header.handle)?;
        match BlobNode::materialize(header, stored, 0, &hooks, &config) {
            Ok(_) => println!("{:>20}  ok", header.handle),
            Err(e) => {
                failures += 1;
                println!("{:>20}  FAILED: {}", header.handle, e);
            }
        }
    }

    tracing::info!(blobs = container.len(), failures, "verification finished");
    Ok(failures == 0)
}

fn load(file: &Path, root: Option<u64>, keys: &[String], bounds: bool) -> baw::Result<bool> {
    let registry = assets::stock_registry()?;
    let loader = Loader::new(&registry);
    let hooks = hooks_with_keys(keys);

    let mut container = Container::open_path(file)?;
    let request = LoadRequest::new(root.map(RootSelector::Handle).unwrap_or(RootSelector::First))
        .with_source_id(file.display().to_string())
        .with_params(LoadParams::with(MeshOptions {
            compute_bounds: bounds,
        }));

    let (object, stats) = loader.load_container_with_stats(&mut container, &request, &hooks)?;

    describe(&object);
    println!();
    println!("visited:      {}", stats.visited);
    println!("instantiated: {}", stats.instantiated);
    println!("max depth:    {}", stats.max_depth);
    println!("decompressed: {} bytes", stats.bytes_decompressed);
    println!("finalized:    {:?}", stats.finalize_order);
    Ok(true)
}

fn describe(object: &LoadedObject) {
    println!("root {} ({})", object.handle(), type_name(object.blob_type()));

    if let Some(mesh) = object.downcast_ref::<Mesh>() {
        println!("  triangles:  {}", mesh.triangle_count());
        if let Some(vb) = mesh.vertex_buffer() {
            println!("  vertices:   {} (stride {})", vb.vertex_count, vb.stride);
        }
        if let Some(skeleton) = mesh.skeleton() {
            println!("  bones:      {}", skeleton.len());
        }
        if let Some(b) = mesh.bounds() {
            println!("  bounds:     {:?} .. {:?}", b.min, b.max);
        }
    } else if let Some(vb) = object.downcast_ref::<VertexBuffer>() {
        println!("  vertices:   {} (stride {})", vb.vertex_count, vb.stride);
    } else if let Some(skeleton) = object.downcast_ref::<BoneHierarchy>() {
        for bone in &skeleton.bones {
            println!("  bone {:<12} parent {:?}", bone.name, bone.parent);
        }
    }
}

fn upgrade(input: &Path, output: &Path) -> baw::Result<bool> {
    let data = fs::read(input)?;
    let upgraded = legacy::upgrade(&data)?;
    fs::write(output, &upgraded)?;

    tracing::info!("Upgraded {} -> {} ({} bytes)", input.display(), output.display(), upgraded.len());
    Ok(true)
}

fn demo(output: &Path, compression: Compression, meshes: usize) -> baw::Result<bool> {
    let data = assets::demo_container(compression, meshes)?;
    fs::write(output, &data)?;

    tracing::info!("Wrote {} ({} bytes, {} meshes, {})", output.display(), data.len(), meshes.max(1), compression.name());
    Ok(true)
}
