//! Material properties for the flexible beam elements.

use modred_io::MaterialDoc;

/// A linear elastic isotropic material with optional Rayleigh damping.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Material name
    pub name: String,
    /// Young's modulus (E) [Pa]
    pub elastic_modulus: f64,
    /// Poisson's ratio (ν) [-]
    pub poissons_ratio: f64,
    /// Density (ρ) [kg/m³]
    pub density: f64,
    /// Mass-proportional damping coefficient [1/s]
    pub rayleigh_alpha: f64,
    /// Stiffness-proportional damping coefficient [s]
    pub rayleigh_beta: f64,
}

impl Material {
    pub fn new(
        name: impl Into<String>,
        elastic_modulus: f64,
        poissons_ratio: f64,
        density: f64,
    ) -> Self {
        Self {
            name: name.into(),
            elastic_modulus,
            poissons_ratio,
            density,
            rayleigh_alpha: 0.0,
            rayleigh_beta: 0.0,
        }
    }

    pub fn with_rayleigh_damping(mut self, alpha: f64, beta: f64) -> Self {
        self.rayleigh_alpha = alpha;
        self.rayleigh_beta = beta;
        self
    }

    /// Get the shear modulus (G) from E and ν
    pub fn shear_modulus(&self) -> f64 {
        self.elastic_modulus / (2.0 * (1.0 + self.poissons_ratio))
    }

    /// Check the material can be used by a structural element.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.elastic_modulus > 0.0) {
            return Err(format!("material '{}' needs a positive elastic modulus", self.name));
        }
        if !(self.poissons_ratio > -1.0 && self.poissons_ratio < 0.5) {
            return Err(format!(
                "material '{}' has Poisson's ratio {} outside (-1, 0.5)",
                self.name, self.poissons_ratio
            ));
        }
        if self.density < 0.0 {
            return Err(format!("material '{}' has negative density", self.name));
        }
        Ok(())
    }
}

impl From<&MaterialDoc> for Material {
    fn from(doc: &MaterialDoc) -> Self {
        Material::new(doc.name.clone(), doc.elastic_modulus, doc.poissons_ratio, doc.density)
            .with_rayleigh_damping(doc.rayleigh_alpha, doc.rayleigh_beta)
    }
}
