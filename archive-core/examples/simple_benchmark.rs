/*!
Simple benchmark example for hyperfine performance testing.

Writes a mesh whose faces share vertices through plain pointers, reads it
back in both encodings and reports timings and file sizes.
*/

use archive_core::{Archivable, Archive, ArchiveConfig, Ptr, Result, TypeRegistry};
use std::time::Instant;

#[derive(Default)]
struct Vertex {
    position: [f64; 3],
}

impl Archivable for Vertex {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.position)
    }
}

#[derive(Default)]
struct Face {
    corners: Vec<Option<Ptr<Vertex>>>,
}

impl Archivable for Face {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.corners)
    }
}

#[derive(Default)]
struct Mesh {
    name: String,
    vertices: Vec<Option<Ptr<Vertex>>>,
    faces: Vec<Face>,
    weights: Vec<f64>,
}

impl Archivable for Mesh {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.name)?;
        ar.archive(&mut self.vertices)?;
        ar.archive(&mut self.faces)?;
        ar.archive(&mut self.weights)
    }
}

fn grid(size: usize) -> Mesh {
    let vertices: Vec<Ptr<Vertex>> = (0..size * size)
        .map(|i| {
            Ptr::new(Vertex {
                position: [(i % size) as f64, (i / size) as f64, 0.0],
            })
        })
        .collect();

    let mut faces = Vec::new();
    for row in 0..size - 1 {
        for col in 0..size - 1 {
            let at = |r: usize, c: usize| Some(vertices[r * size + c].clone());
            faces.push(Face {
                corners: vec![at(row, col), at(row, col + 1), at(row + 1, col + 1), at(row + 1, col)],
            });
        }
    }

    Mesh {
        name: format!("grid{size}"),
        weights: (0..size * size).map(|i| i as f64 * 0.5).collect(),
        vertices: vertices.into_iter().map(Some).collect(),
        faces,
    }
}

fn main() -> Result<()> {
    let registry = TypeRegistry::new();
    let temp_dir = tempfile::TempDir::new()?;
    let mut mesh = grid(200);

    for (config, file_name) in [
        (ArchiveConfig::binary(), "mesh.bin"),
        (ArchiveConfig::text(), "mesh.txt"),
    ] {
        let file_path = temp_dir.path().join(file_name);

        let start = Instant::now();
        let file = std::fs::File::create(&file_path)?;
        let mut ar = archive_core::open_writer(&config, file, &registry, Default::default())?;
        ar.archive(&mut mesh)?;
        let written = ar.object_count();
        ar.finish()?;
        let write_time = start.elapsed();

        let start = Instant::now();
        let file = std::fs::File::open(&file_path)?;
        let mut ar = archive_core::open_reader(&config, file, &registry)?;
        let mut restored = Mesh::default();
        ar.archive(&mut restored)?;
        let read_time = start.elapsed();

        // Verify correctness
        assert_eq!(restored.name, mesh.name);
        assert_eq!(restored.faces.len(), mesh.faces.len());
        assert_eq!(ar.object_count(), written);

        println!("{:?} encoding", config.format);
        println!("  objects: {written}");
        println!("  write: {write_time:?}, read: {read_time:?}");
        println!("  file size: {} bytes", std::fs::metadata(&file_path)?.len());
    }
    Ok(())
}
