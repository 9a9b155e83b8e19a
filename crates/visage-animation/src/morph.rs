//! Render surface seam: named morph target weights on named meshes.

use std::collections::HashMap;

/// Anything that can take a morph target weight by mesh and channel name.
pub trait MorphTargetSurface {
    /// Set one influence. Returns `false` when the mesh or channel does not
    /// exist; that is not an error.
    fn set_morph_target(&mut self, mesh: &str, name: &str, weight: f32) -> bool;
}

#[derive(Debug, Clone, Default)]
struct MorphMesh {
    dictionary: HashMap<String, usize>,
    influences: Vec<f32>,
}

/// Headless rig: meshes with a morph dictionary and influence array, like a
/// skinned mesh in a scene graph.
#[derive(Debug, Clone, Default)]
pub struct MorphTargetRig {
    meshes: HashMap<String, MorphMesh>,
}

impl MorphTargetRig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh<I, S>(&mut self, mesh: &str, morph_targets: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entry = MorphMesh::default();
        for name in morph_targets {
            let index = entry.influences.len();
            entry.dictionary.entry(name.into()).or_insert(index);
            if entry.dictionary.len() > index {
                entry.influences.push(0.0);
            }
        }
        self.meshes.insert(mesh.to_string(), entry);
    }

    /// Same morph targets on every mesh.
    pub fn with_meshes<S: AsRef<str>>(meshes: &[S], morph_targets: &[&str]) -> Self {
        let mut rig = Self::new();
        for mesh in meshes {
            rig.add_mesh(mesh.as_ref(), morph_targets.iter().copied());
        }
        rig
    }

    pub fn influence(&self, mesh: &str, name: &str) -> Option<f32> {
        let mesh = self.meshes.get(mesh)?;
        mesh.dictionary.get(name).map(|&i| mesh.influences[i])
    }

    pub fn mesh_names(&self) -> impl Iterator<Item = &str> {
        self.meshes.keys().map(String::as_str)
    }
}

impl MorphTargetSurface for MorphTargetRig {
    fn set_morph_target(&mut self, mesh: &str, name: &str, weight: f32) -> bool {
        let Some(mesh) = self.meshes.get_mut(mesh) else {
            return false;
        };
        match mesh.dictionary.get(name) {
            Some(&i) => {
                mesh.influences[i] = weight;
                true
            }
            None => false,
        }
    }
}
