use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, ensure};
use bytemuck::{Pod, Zeroable};
use clap::{Parser, Subcommand};
use glam::{Mat4, Vec3};
use gpubatch_arena::{HostMemoryBlock, HostUploadTarget, UploadTarget, VariableBlockAllocator};
use gpubatch_batch::{BatchConfig, BatchRenderer, GeometrySource, MeshData, RecordingSink};
use gpubatch_common::{GeometryId, InstanceSlot, MaterialId};
use gpubatch_wgpu::HeadlessGpu;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gpubatch-cli", about = "Headless tools for the gpubatch arenas and batch compiler")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions
    Info,
    /// Bind items, run a few frames and report batches, commands and uploads
    Demo {
        /// Number of bound items
        #[arg(short, long, default_value = "1000")]
        items: u32,
        /// Number of distinct geometries
        #[arg(short, long, default_value = "8")]
        geometries: u32,
        /// Number of distinct materials
        #[arg(short, long, default_value = "4")]
        materials: u32,
        /// Hide every K-th item (0 keeps everything visible)
        #[arg(long, default_value = "0")]
        hidden_every: u32,
        /// Frames to run; each frame after the first moves a handful of items
        #[arg(short, long, default_value = "3")]
        frames: u32,
        /// JSON batch config
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Upload into wgpu buffers on a headless device
        #[arg(long)]
        gpu: bool,
    },
    /// Report fragmentation of a variable arena before and after compaction
    Fragment {
        /// Number of allocations
        #[arg(short, long, default_value = "1000")]
        allocations: u32,
        /// Remove every K-th allocation
        #[arg(short, long, default_value = "3")]
        remove_every: u32,
    },
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    normal: [f32; 3],
}

/// Cube of half-extent `p`, one quad per face.
fn cube_mesh(p: f32) -> MeshData {
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let (n, u, v) = (Vec3::from(normal), Vec3::from(u), Vec3::from(v));
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            vertices.push(Vertex {
                position: ((n + u * su + v * sv) * p).to_array(),
                normal,
            });
        }
        indices.extend([0, 1, 2, 2, 3, 0].map(|i| base + i));
    }
    MeshData::from_vertices(&vertices, &indices)
}

struct DemoScene {
    items: u32,
    geometries: u32,
    materials: u32,
    hidden_every: u32,
    frames: u32,
}

fn item_transform(i: u32, frame: u32) -> Mat4 {
    let x = (i % 32) as f32 * 2.0;
    let z = (i / 32) as f32 * 2.0;
    let lift = frame as f32 * 0.25;
    let placed = Mat4::from_translation(Vec3::new(x, lift, z));
    if i % 7 == 3 {
        placed * Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0))
    } else {
        placed
    }
}

fn run_demo<U: UploadTarget>(renderer: &mut BatchRenderer<U>, scene: &DemoScene) -> anyhow::Result<()> {
    let meshes: Vec<(GeometryId, Arc<dyn GeometrySource>)> = (0..scene.geometries)
        .map(|g| {
            let mesh: Arc<dyn GeometrySource> = Arc::new(cube_mesh(0.25 + g as f32 * 0.125));
            (GeometryId::from_name(&format!("cube{g}")), mesh)
        })
        .collect();

    let mut slots: Vec<InstanceSlot> = Vec::with_capacity(scene.items as usize);
    for i in 0..scene.items {
        let (id, mesh) = &meshes[(i % scene.geometries) as usize];
        let material = MaterialId::from_name(&format!("material{}", i % scene.materials));
        let slot = renderer.bind(*id, mesh.clone(), material, item_transform(i, 0))?;
        if scene.hidden_every > 0 && i % scene.hidden_every == 0 {
            renderer.set_visible(slot, false)?;
        }
        slots.push(slot);
    }

    let mut sink = RecordingSink::new();
    for frame in 0..scene.frames {
        if frame > 0 {
            for (i, slot) in slots.iter().enumerate().step_by(97) {
                renderer.update_transform(*slot, item_transform(i as u32, frame))?;
            }
        }
        let stats = renderer.execute(&mut sink)?;
        println!(
            "frame {frame}: registered={} compacted={} batches={} commands={} instances={} state_changes={} uploads={} ({} bytes)",
            stats.committed.registered,
            stats.compacted,
            stats.submit.batches,
            stats.submit.commands,
            stats.submit.instances,
            stats.submit.state_changes,
            stats.upload_calls(),
            stats.data_uploads.bytes + stats.submit.uploads.bytes,
        );
        sink.clear();
    }

    let geometry = renderer.geometry();
    println!(
        "vertex arena: {} / {} bytes, index arena: {} / {} bytes, instance slots: {} live of {}",
        geometry.vertex_arena().apparent_size(),
        geometry.vertex_arena().capacity(),
        geometry.index_arena().apparent_size(),
        geometry.index_arena().capacity(),
        renderer.instances().live(),
        renderer.instances().capacity(),
    );
    Ok(())
}

/// Deterministic allocation sizes for the fragmentation report.
fn allocation_size(i: u32) -> u32 {
    let mixed = (i as u64).wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    16 + ((mixed >> 33) % 496) as u32
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("gpubatch-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", gpubatch_common::crate_info());
            println!("arena: {}", gpubatch_arena::crate_info());
            println!("batch: {}", gpubatch_batch::crate_info());
            println!("wgpu: {}", gpubatch_wgpu::crate_info());
        }
        Commands::Demo {
            items,
            geometries,
            materials,
            hidden_every,
            frames,
            config,
            gpu,
        } => {
            ensure!(geometries > 0 && materials > 0, "need at least one geometry and one material");
            let config = match config {
                Some(path) => BatchConfig::load(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => BatchConfig::default(),
            };
            ensure!(
                config.vertex_stride_b as usize == std::mem::size_of::<Vertex>(),
                "demo meshes use {}-byte vertices, config says {}",
                std::mem::size_of::<Vertex>(),
                config.vertex_stride_b
            );
            let scene = DemoScene {
                items,
                geometries,
                materials,
                hidden_every,
                frames,
            };
            println!(
                "Batching demo: items={items}, geometries={geometries}, materials={materials}, gpu={gpu}"
            );

            if gpu {
                let device = HeadlessGpu::request()?;
                println!(
                    "adapter: {} ({:?}), multi-draw capable: {}",
                    device.adapter().name,
                    device.adapter().backend,
                    device.can_draw()
                );
                let mut renderer = BatchRenderer::new(config, |role| device.target(role))?;
                run_demo(&mut renderer, &scene)?;
                device.wait_idle();
                let commands = renderer.compiler().command_buffer().target();
                println!(
                    "command buffer: {} bytes, recreated {} times",
                    commands.size(),
                    commands.reallocations()
                );
            } else {
                let mut renderer = BatchRenderer::new(config, |_| HostUploadTarget::new())?;
                run_demo(&mut renderer, &scene)?;
            }
        }
        Commands::Fragment {
            allocations,
            remove_every,
        } => {
            ensure!(remove_every > 0, "--remove-every must be at least 1");
            let mut arena = VariableBlockAllocator::new(HostMemoryBlock::new(0));
            let mut keys = Vec::with_capacity(allocations as usize);
            for i in 0..allocations {
                let size_b = allocation_size(i);
                let key = arena.alloc(size_b)?;
                arena.set(key, &vec![(i % 251) as u8; size_b as usize])?;
                keys.push(key);
            }
            println!(
                "allocated {} blocks: apparent={} real={} capacity={}",
                arena.len(),
                arena.apparent_size(),
                arena.real_size(),
                arena.capacity()
            );

            for key in keys.iter().step_by(remove_every as usize) {
                arena.remove(*key)?;
            }
            println!(
                "after removing every {remove_every}: live={} apparent={} real={} fragmentation={:.1}%",
                arena.len(),
                arena.apparent_size(),
                arena.real_size(),
                arena.fragmentation() * 100.0
            );

            let compacted = arena.compaction()?;
            println!(
                "compaction ran={compacted}: apparent={} real={} fragmentation={:.1}%",
                arena.apparent_size(),
                arena.real_size(),
                arena.fragmentation() * 100.0
            );
        }
    }

    Ok(())
}
