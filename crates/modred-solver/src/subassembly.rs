//! Arena of items, beams and links forming one flexible subassembly.

use std::collections::HashMap;

use nalgebra::{DVector, Matrix3, UnitQuaternion, Vector3};
use tracing::debug;

use modred_io::{ItemKindDoc, LinkKindDoc, ModelDocument, PartitionDoc};

use crate::elements::{Beam31, BeamSection};
use crate::error::{ModalError, Result};
use crate::items::{FeaNode, ItemHandle, Partition, PhysicsItem, Pose, RigidBody, RigidState};
use crate::links::{Link, LinkKind};
use crate::materials::Material;
use crate::partition::CoordinatePartition;
use crate::state::StateAccessor;

/// Total mass, center of mass and inertia about the center (absolute axes).
#[derive(Debug, Clone, PartialEq)]
pub struct MassProperties {
    pub mass: f64,
    pub center: Vector3<f64>,
    pub inertia: Matrix3<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct Subassembly {
    pub name: String,
    boundary: Vec<PhysicsItem>,
    internal: Vec<PhysicsItem>,
    beams: Vec<Beam31>,
    links: Vec<Link>,
    materials: Vec<Material>,
    partition: CoordinatePartition,
}

impl Subassembly {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_item(&mut self, partition: Partition, item: PhysicsItem) -> ItemHandle {
        let items = match partition {
            Partition::Boundary => &mut self.boundary,
            Partition::Internal => &mut self.internal,
        };
        items.push(item);
        ItemHandle {
            partition,
            index: items.len() - 1,
        }
    }

    pub fn add_material(&mut self, material: Material) -> Result<usize> {
        material.validate().map_err(ModalError::Configuration)?;
        self.materials.push(material);
        Ok(self.materials.len() - 1)
    }

    pub fn add_beam(
        &mut self,
        id: u32,
        items: [ItemHandle; 2],
        section: BeamSection,
        material: usize,
    ) -> Result<()> {
        for h in items {
            self.check_handle(h)?;
        }
        if items[0] == items[1] {
            return Err(ModalError::Configuration(format!(
                "beam {} connects an item to itself",
                id
            )));
        }
        if material >= self.materials.len() {
            return Err(ModalError::Configuration(format!(
                "beam {} references material index {} out of {}",
                id,
                material,
                self.materials.len()
            )));
        }
        self.beams.push(Beam31::new(id, items, section, material));
        Ok(())
    }

    /// Adds a joint through the absolute point `point`, using the current poses.
    pub fn add_link(
        &mut self,
        id: u32,
        kind: LinkKind,
        partition: Partition,
        items: [ItemHandle; 2],
        point: Vector3<f64>,
    ) -> Result<()> {
        let ends = [self.pose_of(items[0])?, self.pose_of(items[1])?];
        self.links.push(Link::new(id, kind, partition, items, ends, point));
        Ok(())
    }

    fn check_handle(&self, h: ItemHandle) -> Result<()> {
        if self.item(h).is_none() {
            return Err(ModalError::Configuration(format!("unknown item handle {:?}", h)));
        }
        Ok(())
    }

    pub fn pose_of(&self, h: ItemHandle) -> Result<Pose> {
        self.item(h)
            .map(PhysicsItem::pose)
            .ok_or_else(|| ModalError::Configuration(format!("unknown item handle {:?}", h)))
    }

    /// Counts coordinates and assigns constraint row offsets.
    ///
    /// Boundary links come first in the constraint rows, internal links after.
    pub fn setup(&mut self) -> Result<()> {
        if self.boundary.is_empty() {
            return Err(ModalError::Configuration(
                "subassembly needs at least one boundary item".to_string(),
            ));
        }
        if let Some(link) = self.links.iter().find(|l| {
            l.partition == Partition::Boundary
                && l.items.iter().any(|h| h.partition == Partition::Internal)
        }) {
            return Err(ModalError::Configuration(format!(
                "boundary link {} touches an internal item",
                link.id
            )));
        }
        let mut doc = [0usize; 2];
        for link in &mut self.links {
            let slot = match link.partition {
                Partition::Boundary => 0,
                Partition::Internal => 1,
            };
            link.offset_doc = doc[slot];
            doc[slot] += link.n_constraints();
        }

        let modes = self.partition.n_modes_coords_w;
        self.partition = CoordinatePartition {
            n_boundary_coords: self.boundary.len() * PhysicsItem::DOF,
            n_boundary_coords_w: self.boundary.len() * PhysicsItem::DOF_W,
            n_boundary_doc: doc[0],
            n_internal_coords: self.internal.len() * PhysicsItem::DOF,
            n_internal_coords_w: self.internal.len() * PhysicsItem::DOF_W,
            n_internal_doc: doc[1],
            n_modes_coords_w: modes,
        };
        debug!(
            name = %self.name,
            boundary_items = self.boundary.len(),
            internal_items = self.internal.len(),
            beams = self.beams.len(),
            links = self.links.len(),
            "subassembly setup"
        );
        Ok(())
    }

    pub(crate) fn set_n_modes_coords_w(&mut self, n: usize) {
        self.partition.n_modes_coords_w = n;
    }

    pub fn item(&self, h: ItemHandle) -> Option<&PhysicsItem> {
        self.items(h.partition).get(h.index)
    }

    pub fn item_mut(&mut self, h: ItemHandle) -> Option<&mut PhysicsItem> {
        self.items_mut(h.partition).get_mut(h.index)
    }

    pub fn items(&self, partition: Partition) -> &[PhysicsItem] {
        match partition {
            Partition::Boundary => &self.boundary,
            Partition::Internal => &self.internal,
        }
    }

    pub fn items_mut(&mut self, partition: Partition) -> &mut [PhysicsItem] {
        match partition {
            Partition::Boundary => &mut self.boundary,
            Partition::Internal => &mut self.internal,
        }
    }

    pub fn beams(&self) -> &[Beam31] {
        &self.beams
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// Offset of an item in the full velocity vector `[B; I]`.
    pub fn full_offset_w(&self, h: ItemHandle) -> usize {
        match h.partition {
            Partition::Boundary => h.index * PhysicsItem::DOF_W,
            Partition::Internal => {
                self.partition.n_boundary_coords_w + h.index * PhysicsItem::DOF_W
            }
        }
    }

    /// Offset of a link's first row in the full constraint vector.
    pub fn full_offset_doc(&self, link: &Link) -> usize {
        match link.partition {
            Partition::Boundary => link.offset_doc,
            Partition::Internal => self.partition.n_boundary_doc + link.offset_doc,
        }
    }

    /// Drops atomic masses; they are carried by the reduced mass matrix.
    pub fn remove_item_masses(&mut self) {
        for item in self.boundary.iter_mut().chain(self.internal.iter_mut()) {
            item.remove_mass();
        }
    }

    /// Mass properties of items and beams, in the current configuration.
    pub fn mass_properties(&self) -> MassProperties {
        // (mass, center, inertia about own center)
        let mut parts: Vec<(f64, Vector3<f64>, Matrix3<f64>)> = Vec::new();
        for item in self.boundary.iter().chain(self.internal.iter()) {
            parts.push((item.mass(), item.position(), item.inertia_abs()));
        }
        for beam in &self.beams {
            let (Some(a), Some(b)) = (self.item(beam.items[0]), self.item(beam.items[1])) else {
                continue;
            };
            let Some(material) = self.materials.get(beam.material) else {
                continue;
            };
            let axis = b.position() - a.position();
            let length = axis.norm();
            if length < 1e-12 {
                continue;
            }
            let ex = axis / length;
            let m = material.density * beam.section.area * length;
            let rod = (Matrix3::identity() - ex * ex.transpose()) * (m * length * length / 12.0);
            let polar = material.density * beam.section.polar_moment() * length;
            let spin = ex * ex.transpose() * polar;
            parts.push((m, (a.position() + b.position()) * 0.5, rod + spin));
        }

        let mass: f64 = parts.iter().map(|p| p.0).sum();
        if mass <= 0.0 {
            return MassProperties {
                mass: 0.0,
                center: Vector3::zeros(),
                inertia: Matrix3::zeros(),
            };
        }
        let center = parts.iter().fold(Vector3::zeros(), |acc, p| acc + p.1 * p.0) / mass;
        let inertia = parts.iter().fold(Matrix3::zeros(), |acc, (m, r, j)| {
            let d = r - center;
            acc + j + (Matrix3::identity() * d.norm_squared() - d * d.transpose()) * *m
        });
        MassProperties { mass, center, inertia }
    }

    /// Builds and sets up a subassembly from a validated model document.
    pub fn from_document(doc: &ModelDocument) -> Result<Self> {
        doc.validate()?;
        let mut sub = Subassembly::new(doc.name.clone());

        let mut handles: HashMap<u32, ItemHandle> = HashMap::new();
        for item in &doc.items {
            let [w, x, y, z] = item.rotation;
            let rot = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(w, x, y, z));
            let state = RigidState::at(Vector3::from(item.position), rot);
            let inertia = Vector3::from(item.inertia);
            let physics = match item.kind {
                ItemKindDoc::Body => {
                    PhysicsItem::Body(RigidBody::new(item.id, state, item.mass, inertia))
                }
                ItemKindDoc::Node => PhysicsItem::Node(
                    FeaNode::new(item.id, state).with_lumped_mass(item.mass, inertia),
                ),
            };
            let handle = sub.add_item(partition_of(item.partition), physics);
            handles.insert(item.id, handle);
        }

        let mut material_index = HashMap::new();
        for m in &doc.materials {
            let idx = sub.add_material(Material::from(m))?;
            material_index.insert(m.name.clone(), idx);
        }

        let lookup = |id: u32| {
            handles
                .get(&id)
                .copied()
                .ok_or_else(|| ModalError::Configuration(format!("unknown item {}", id)))
        };

        for beam in &doc.beams {
            let section = doc
                .section(&beam.section)
                .map(BeamSection::from)
                .ok_or_else(|| {
                    ModalError::Configuration(format!("unknown section '{}'", beam.section))
                })?;
            let material = material_index
                .get(&beam.material)
                .copied()
                .ok_or_else(|| {
                    ModalError::Configuration(format!("unknown material '{}'", beam.material))
                })?;
                let ends = [lookup(beam.items[0])?, lookup(beam.items[1])?];
                sub.add_beam(beam.id, ends, section, material)?;
        }

        for link in &doc.links {
            let kind = match link.kind {
                LinkKindDoc::Spherical => LinkKind::Spherical,
                LinkKindDoc::Lock => LinkKind::Lock,
            };
            sub.add_link(
                link.id,
                kind,
                partition_of(link.partition),
                [lookup(link.items[0])?, lookup(link.items[1])?],
                Vector3::from(link.point),
            )?;
        }

        sub.setup()?;
        Ok(sub)
    }
}

fn partition_of(p: PartitionDoc) -> Partition {
    match p {
        PartitionDoc::Boundary => Partition::Boundary,
        PartitionDoc::Internal => Partition::Internal,
    }
}

impl StateAccessor for Subassembly {
    fn coordinate_partition(&self) -> CoordinatePartition {
        self.partition
    }

    fn gather_state(&self, partition: Partition, x: &mut DVector<f64>, v: &mut DVector<f64>) {
        for (i, item) in self.items(partition).iter().enumerate() {
            item.gather_state(x, i * PhysicsItem::DOF, v, i * PhysicsItem::DOF_W);
        }
    }

    fn scatter_state(&mut self, partition: Partition, x: &DVector<f64>, v: &DVector<f64>) {
        for (i, item) in self.items_mut(partition).iter_mut().enumerate() {
            item.scatter_state(x, i * PhysicsItem::DOF, v, i * PhysicsItem::DOF_W);
        }
    }

    fn gather_acceleration(&self, partition: Partition, a: &mut DVector<f64>) {
        for (i, item) in self.items(partition).iter().enumerate() {
            item.gather_acceleration(a, i * PhysicsItem::DOF_W);
        }
    }

    fn scatter_acceleration(&mut self, partition: Partition, a: &DVector<f64>) {
        for (i, item) in self.items_mut(partition).iter_mut().enumerate() {
            item.scatter_acceleration(a, i * PhysicsItem::DOF_W);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn node(id: u32, x: f64) -> PhysicsItem {
        let state = RigidState::at(Vector3::new(x, 0.0, 0.0), UnitQuaternion::identity());
        PhysicsItem::Node(FeaNode::new(id, state))
    }

    fn chain() -> Subassembly {
        let mut sub = Subassembly::new("chain");
        let a = sub.add_item(Partition::Boundary, node(1, 0.0));
        let b = sub.add_item(Partition::Internal, node(2, 1.0));
        let c = sub.add_item(Partition::Boundary, node(3, 2.0));
        let steel = sub.add_material(Material::new("steel", 2e11, 0.3, 7800.0)).unwrap();
        sub.add_beam(1, [a, b], BeamSection::circular(0.01), steel).unwrap();
        sub.add_beam(2, [b, c], BeamSection::circular(0.01), steel).unwrap();
        let pivot = Vector3::new(1.0, 0.0, 0.0);
        sub.add_link(1, LinkKind::Spherical, Partition::Boundary, [a, c], pivot).unwrap();
        sub.setup().unwrap();
        sub
    }

    #[test]
    fn setup_counts_coordinates() {
        let sub = chain();
        let p = sub.coordinate_partition();
        assert_eq!(p.n_boundary_coords, 14);
        assert_eq!(p.n_boundary_coords_w, 12);
        assert_eq!(p.n_internal_coords_w, 6);
        assert_eq!(p.n_boundary_doc, 3);
        assert_eq!(p.n_internal_doc, 0);
        assert_eq!(sub.full_offset_w(ItemHandle::internal(0)), 12);
    }

    #[test]
    fn mass_properties_of_uniform_bar() {
        let sub = chain();
        let props = sub.mass_properties();
        let m = 7800.0 * std::f64::consts::PI * 1e-4 * 2.0;
        assert_relative_eq!(props.mass, m, max_relative = 1e-12);
        assert_relative_eq!(props.center, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
        // two half-rods: 2 * (m/2 * 1/12 + m/2 * 0.25) = m/3 about the center
        assert_relative_eq!(props.inertia[(1, 1)], m / 3.0, max_relative = 1e-12);
    }

    #[test]
    fn full_state_roundtrip() {
        let mut sub = chain();
        let (mut x, mut v) = sub.gather_full_state();
        assert_eq!(x.len(), 21);
        assert_eq!(v.len(), 18);
        x[14] = 5.0;
        v[12] = -1.0;
        sub.scatter_full_state(&x, &v);
        let item = sub.item(ItemHandle::internal(0)).unwrap();
        assert_eq!(item.position().x, 5.0);
        assert_eq!(item.state().pos_dt.x, -1.0);
    }

    #[test]
    fn setup_requires_boundary() {
        let mut sub = Subassembly::new("empty");
        sub.add_item(Partition::Internal, node(1, 0.0));
        assert!(matches!(sub.setup(), Err(ModalError::Configuration(_))));
    }

    #[test]
    fn boundary_link_on_internal_item_is_rejected() {
        let mut sub = Subassembly::new("bad");
        let a = sub.add_item(Partition::Boundary, node(1, 0.0));
        let b = sub.add_item(Partition::Internal, node(2, 1.0));
        sub.add_link(4, LinkKind::Lock, Partition::Boundary, [a, b], Vector3::new(0.5, 0.0, 0.0))
            .unwrap();
        assert!(matches!(sub.setup(), Err(ModalError::Configuration(_))));
    }

    #[test]
    fn builds_from_document() {
        let json = r#"{
            "name": "bar",
            "materials": [
                {
                    "name": "steel",
                    "elastic_modulus": 2.0e11,
                    "poissons_ratio": 0.3,
                    "density": 7850.0
                }
            ],
            "sections": [{"name": "rod", "shape": "circular", "radius": 0.01}],
            "items": [
                {"id": 1, "kind": "node", "partition": "boundary", "position": [0.0, 0.0, 0.0]},
                {"id": 2, "kind": "node", "partition": "internal", "position": [0.5, 0.0, 0.0]},
                {
                    "id": 3, "kind": "body", "partition": "boundary",
                    "position": [1.0, 0.0, 0.0], "mass": 2.0
                }
            ],
            "beams": [
                {"id": 1, "items": [1, 2], "section": "rod", "material": "steel"},
                {"id": 2, "items": [2, 3], "section": "rod", "material": "steel"}
            ],
            "links": [
                {
                    "id": 1, "kind": "lock", "partition": "internal",
                    "items": [2, 3], "point": [0.75, 0.0, 0.0]
                }
            ]
        }"#;
        let doc: ModelDocument = serde_json::from_str(json).unwrap();
        let sub = Subassembly::from_document(&doc).unwrap();
        let p = sub.coordinate_partition();
        assert_eq!(p.n_boundary_coords_w, 12);
        assert_eq!(p.n_internal_coords_w, 6);
        assert_eq!(p.n_internal_doc, 6);
        assert_eq!(sub.beams().len(), 2);
        assert_eq!(sub.items(Partition::Boundary)[1].id(), 3);
    }
}
