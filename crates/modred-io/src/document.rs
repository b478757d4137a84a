//! JSON description of a flexible subassembly.
//!
//! A document lists materials, beam sections, items (6-DOF FE nodes and rigid
//! bodies), beam elements and links. Every item and link declares whether it
//! belongs to the boundary (interface) partition or to the internal partition
//! that gets eliminated by the modal reduction.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoError, Result};
use crate::json::{load_json, save_json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionDoc {
    Boundary,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKindDoc {
    Node,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKindDoc {
    Spherical,
    Lock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialDoc {
    pub name: String,
    pub elastic_modulus: f64,
    pub poissons_ratio: f64,
    pub density: f64,
    #[serde(default)]
    pub rayleigh_alpha: f64,
    #[serde(default)]
    pub rayleigh_beta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum SectionShapeDoc {
    Circular {
        radius: f64,
    },
    Rectangular {
        width: f64,
        height: f64,
    },
    Custom {
        area: f64,
        iyy: f64,
        izz: f64,
        torsion_constant: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDoc {
    pub name: String,
    #[serde(flatten)]
    pub shape: SectionShapeDoc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDoc {
    pub id: u32,
    pub kind: ItemKindDoc,
    pub partition: PartitionDoc,
    pub position: [f64; 3],
    /// Orientation quaternion as `[w, x, y, z]`; identity when omitted.
    #[serde(default = "identity_quaternion")]
    pub rotation: [f64; 4],
    #[serde(default)]
    pub mass: f64,
    /// Principal inertia in the item's own axes.
    #[serde(default)]
    pub inertia: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamDoc {
    pub id: u32,
    pub items: [u32; 2],
    pub section: String,
    pub material: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDoc {
    pub id: u32,
    pub kind: LinkKindDoc,
    pub partition: PartitionDoc,
    pub items: [u32; 2],
    /// Joint location in absolute coordinates.
    pub point: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub materials: Vec<MaterialDoc>,
    #[serde(default)]
    pub sections: Vec<SectionDoc>,
    pub items: Vec<ItemDoc>,
    #[serde(default)]
    pub beams: Vec<BeamDoc>,
    #[serde(default)]
    pub links: Vec<LinkDoc>,
}

fn identity_quaternion() -> [f64; 4] {
    [1.0, 0.0, 0.0, 0.0]
}

fn default_schema_version() -> u32 {
    1
}

impl ModelDocument {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let doc: ModelDocument = load_json(path)?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        save_json(path, self)
    }

    pub fn item(&self, id: u32) -> Option<&ItemDoc> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn material(&self, name: &str) -> Option<&MaterialDoc> {
        self.materials.iter().find(|m| m.name == name)
    }

    pub fn section(&self, name: &str) -> Option<&SectionDoc> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Checks ids are unique and every reference resolves.
    pub fn validate(&self) -> Result<()> {
        let mut ids = BTreeSet::new();
        for item in &self.items {
            if !ids.insert(item.id) {
                return Err(IoError::InvalidData(format!("duplicate item id {}", item.id)));
            }
            let norm = item.rotation.iter().map(|q| q * q).sum::<f64>().sqrt();
            if norm < 1e-12 {
                return Err(IoError::InvalidData(format!(
                    "item {} has a zero rotation quaternion",
                    item.id
                )));
            }
            if item.mass < 0.0 || item.inertia.iter().any(|j| *j < 0.0) {
                return Err(IoError::InvalidData(format!(
                    "item {} has negative mass or inertia",
                    item.id
                )));
            }
        }

        for beam in &self.beams {
            for id in beam.items {
                if self.item(id).is_none() {
                    return Err(IoError::InvalidData(format!(
                        "beam {} references unknown item {}",
                        beam.id, id
                    )));
                }
            }
            if beam.items[0] == beam.items[1] {
                return Err(IoError::InvalidData(format!(
                    "beam {} connects item {} to itself",
                    beam.id, beam.items[0]
                )));
            }
            if self.material(&beam.material).is_none() {
                return Err(IoError::InvalidData(format!(
                    "beam {} references unknown material '{}'",
                    beam.id, beam.material
                )));
            }
            if self.section(&beam.section).is_none() {
                return Err(IoError::InvalidData(format!(
                    "beam {} references unknown section '{}'",
                    beam.id, beam.section
                )));
            }
        }

        for link in &self.links {
            for id in link.items {
                if self.item(id).is_none() {
                    return Err(IoError::InvalidData(format!(
                        "link {} references unknown item {}",
                        link.id, id
                    )));
                }
            }
        }

        if !self
            .items
            .iter()
            .any(|item| item.partition == PartitionDoc::Boundary)
        {
            return Err(IoError::InvalidData(
                "model needs at least one boundary item".to_string(),
            ));
        }

        Ok(())
    }
}
