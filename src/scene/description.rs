use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use glam::Vec3;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::config::{CameraSettings, PipelineSettings};
use crate::light::PointLight;
use crate::mesh::{MeshId, Primitive};
use crate::scene::{Material, SceneGraph, Spin, Transform};

/// Scene as written by the authoring tools, before it is turned into a
/// [`SceneGraph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SceneDescription {
    pub objects: Vec<SceneObject>,
    #[serde(default)]
    pub settings: SettingsOverrides,
}

impl SceneDescription {
    /// Parses the scene XML.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let document = Document::parse(xml).context("invalid scene XML")?;
        let mut objects = Vec::new();

        for node in document.descendants().filter(|n| n.has_tag_name("object")) {
            let name = required_text(&node, "name")?;
            let kind = match optional_text(&node, "type") {
                Some(kind) => SceneObjectKind::from_name(&kind)
                    .ok_or_else(|| anyhow!("object {name} has unknown type {kind}"))?,
                None => SceneObjectKind::Mesh,
            };
            let mut object = SceneObject {
                name,
                kind,
                ..SceneObject::default()
            };
            object.parent = optional_text(&node, "parent");
            object.mesh = optional_text(&node, "mesh");
            object.color = parse_color(optional_text(&node, "color"), object.color)?;
            object.position = parse_vec3(optional_text(&node, "position"), object.position)?;
            object.rotation = parse_vec3(optional_text(&node, "rotation"), object.rotation)?;
            object.scale = parse_vec3(optional_text(&node, "scale"), object.scale)?;
            object.target = optional_text(&node, "target")
                .map(|text| parse_vec3(Some(text), Vec3::ZERO))
                .transpose()?;
            object.attenuation =
                parse_vec3(optional_text(&node, "attenuation"), object.attenuation)?;
            object.fov = parse_f32(optional_text(&node, "fov"), object.fov)?;
            object.intensity = parse_f32(optional_text(&node, "intensity"), object.intensity)?;
            object.spin = optional_text(&node, "spin")
                .map(|text| parse_f32(Some(text), 0.0))
                .transpose()?;
            object.casts_shadows = parse_bool(optional_text(&node, "shadows"), true)?;
            objects.push(object);
        }

        let settings = match document.descendants().find(|n| n.has_tag_name("settings")) {
            Some(node) => SettingsOverrides::from_node(&node)?,
            None => SettingsOverrides::default(),
        };

        Ok(Self { objects, settings })
    }

    pub fn lights(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects
            .iter()
            .filter(|object| object.kind == SceneObjectKind::Light)
    }

    pub fn camera_object(&self) -> Option<&SceneObject> {
        self.objects
            .iter()
            .find(|object| object.kind == SceneObjectKind::Camera)
    }

    /// Builds the arena graph. Parents must be declared before their children.
    pub fn build_graph(&self) -> Result<SceneGraph> {
        let mut graph = SceneGraph::new();
        let mut primitives: HashMap<Primitive, MeshId> = HashMap::new();
        let mut named = HashMap::new();

        for object in &self.objects {
            match object.kind {
                SceneObjectKind::Light => {
                    graph.add_light(PointLight {
                        position: object.position,
                        colour: object.color,
                        attenuation: object.attenuation,
                        intensity: object.intensity,
                    });
                }
                SceneObjectKind::Camera => {}
                SceneObjectKind::Mesh | SceneObjectKind::Group => {
                    let parent = match object.parent.as_deref() {
                        Some(parent) => Some(*named.get(parent).ok_or_else(|| {
                            anyhow!("object {} references unknown parent {parent}", object.name)
                        })?),
                        None => None,
                    };
                    let id = graph.add_node(object.name.clone(), parent);
                    if let Some(node) = graph.node_mut(id) {
                        node.transform = Transform::from_euler_degrees(
                            object.position,
                            object.rotation,
                            object.scale,
                        );
                        node.casts_shadows = object.casts_shadows;
                    }
                    if object.kind == SceneObjectKind::Mesh {
                        let name = object.mesh.as_deref().unwrap_or("cube");
                        let primitive = Primitive::from_name(name).ok_or_else(|| {
                            anyhow!("object {} uses unknown mesh {name}", object.name)
                        })?;
                        let mesh = *primitives
                            .entry(primitive)
                            .or_insert_with(|| graph.add_mesh(primitive.build()));
                        graph.set_mesh(id, mesh, Material::with_colour(object.color));
                    }
                    if let Some(speed) = object.spin {
                        graph.set_behaviour(id, Box::new(Spin { axis: Vec3::Y, speed }));
                    }
                    named.insert(object.name.clone(), id);
                }
            }
        }
        Ok(graph)
    }

    /// Camera placed by the first camera object, or a default view of the
    /// origin from `(0, 2, 5)`.
    pub fn build_camera(&self, settings: &CameraSettings) -> Result<Camera> {
        let mut camera = Camera::from_settings(settings)?;
        match self.camera_object() {
            Some(object) => {
                camera.set_fov(object.fov)?;
                camera.position = object.position;
                match object.target {
                    Some(target) => camera.look_at(target),
                    None => {
                        camera.rotation = Transform::from_euler_degrees(
                            Vec3::ZERO,
                            object.rotation,
                            Vec3::ONE,
                        )
                        .rotation
                        .inverse();
                    }
                }
            }
            None => {
                camera.position = Vec3::new(0.0, 2.0, 5.0);
                camera.look_at(Vec3::ZERO);
            }
        }
        Ok(camera)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneObjectKind {
    Mesh,
    Group,
    Light,
    Camera,
}

impl SceneObjectKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mesh" | "part" => Some(Self::Mesh),
            "group" | "model" => Some(Self::Group),
            "light" => Some(Self::Light),
            "camera" => Some(Self::Camera),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mesh => "mesh",
            Self::Group => "group",
            Self::Light => "light",
            Self::Camera => "camera",
        }
    }
}

/// Object as described by the authoring tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SceneObjectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<String>,
    pub color: Vec3,
    pub position: Vec3,
    /// Euler angles in degrees.
    pub rotation: Vec3,
    pub scale: Vec3,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Vec3>,
    pub attenuation: Vec3,
    pub fov: f32,
    pub intensity: f32,
    /// Degrees per second around `+Y`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spin: Option<f32>,
    pub casts_shadows: bool,
}

impl Default for SceneObject {
    fn default() -> Self {
        let light = PointLight::default();
        Self {
            name: String::new(),
            kind: SceneObjectKind::Mesh,
            parent: None,
            mesh: None,
            color: Vec3::ONE,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            target: None,
            attenuation: light.attenuation,
            fov: CameraSettings::default().fov,
            intensity: light.intensity,
            spin: None,
            casts_shadows: true,
        }
    }
}

/// Optional `<settings>` block of a scene file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsOverrides {
    pub msaa_samples: Option<u32>,
    pub ssao_samples: Option<u32>,
    pub ssao_radius: Option<f32>,
    pub ssao_texture_scale: Option<f32>,
    pub shadow_resolution: Option<u32>,
    pub max_lights: Option<usize>,
}

impl SettingsOverrides {
    fn from_node(node: &Node<'_, '_>) -> Result<Self> {
        Ok(Self {
            msaa_samples: parse_opt(node, "msaaSamples")?,
            ssao_samples: parse_opt(node, "ssaoSamples")?,
            ssao_radius: parse_opt(node, "ssaoRadius")?,
            ssao_texture_scale: parse_opt(node, "ssaoTextureScale")?,
            shadow_resolution: parse_opt(node, "shadowResolution")?,
            max_lights: parse_opt(node, "maxLights")?,
        })
    }

    pub fn apply(&self, settings: &mut PipelineSettings) {
        if let Some(value) = self.msaa_samples {
            settings.msaa_samples = value;
        }
        if let Some(value) = self.ssao_samples {
            settings.ssao.samples = value;
        }
        if let Some(value) = self.ssao_radius {
            settings.ssao.radius = value;
        }
        if let Some(value) = self.ssao_texture_scale {
            settings.ssao.texture_scale = value;
        }
        if let Some(value) = self.shadow_resolution {
            settings.shadow.resolution = value;
        }
        if let Some(value) = self.max_lights {
            settings.max_lights = value;
        }
    }
}

fn parse_opt<T>(node: &Node<'_, '_>, tag: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_text(node, tag)
        .map(|text| {
            text.parse::<T>()
                .map_err(|err| anyhow!("failed to parse <{tag}>: {err}"))
        })
        .transpose()
}

fn required_text(node: &Node<'_, '_>, tag: &str) -> Result<String> {
    optional_text(node, tag).ok_or_else(|| anyhow!("<{tag}> tag is missing"))
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name(tag))
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| text.to_string())
}

fn parse_components(value: &str, what: &str) -> Result<Vec3> {
    let numbers = value
        .split_whitespace()
        .map(|component| {
            component
                .parse::<f32>()
                .map_err(|err| anyhow!("{what} component {component:?}: {err}"))
        })
        .collect::<Result<Vec<_>>>()?;
    match numbers.as_slice() {
        [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
        _ => bail!("{what} needs 3 components, got {}", numbers.len()),
    }
}

fn parse_vec3(value: Option<String>, default: Vec3) -> Result<Vec3> {
    match value {
        Some(value) => parse_components(&value, "vector"),
        None => Ok(default),
    }
}

fn parse_color(value: Option<String>, default: Vec3) -> Result<Vec3> {
    match value {
        Some(value) => Ok(parse_components(&value, "color")? / 255.0),
        None => Ok(default),
    }
}

fn parse_f32(value: Option<String>, default: f32) -> Result<f32> {
    match value {
        Some(value) => value
            .parse::<f32>()
            .map_err(|err| anyhow!("failed to parse float: {err}")),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, default: bool) -> Result<bool> {
    match value.as_deref() {
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => bail!("expected a boolean, got {other}"),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneView;

    const SAMPLE: &str = r#"
    <scene>
        <settings>
            <ssaoSamples>16</ssaoSamples>
            <shadowResolution>512</shadowResolution>
        </settings>
        <object>
            <name>Camera</name>
            <type>camera</type>
            <fov>70</fov>
            <position>0 2 5</position>
            <target>0 0 0</target>
        </object>
        <object>
            <name>Light</name>
            <type>light</type>
            <intensity>1.5</intensity>
            <position>0 5 0</position>
            <color>255 128 0</color>
        </object>
        <object>
            <name>Floor</name>
            <mesh>plane</mesh>
            <scale>10 1 10</scale>
            <position>0 -0.5 0</position>
        </object>
        <object>
            <name>Cube</name>
            <mesh>cube</mesh>
            <parent>Floor</parent>
            <spin>45</spin>
        </object>
    </scene>
    "#;

    #[test]
    fn parse_scene_populates_objects_and_lights() {
        let scene = SceneDescription::from_xml(SAMPLE).unwrap();
        assert_eq!(scene.objects.len(), 4);
        let light = scene.lights().next().unwrap();
        assert_eq!(light.position, Vec3::new(0.0, 5.0, 0.0));
        assert!((light.intensity - 1.5).abs() < f32::EPSILON);
        assert_eq!(light.color, Vec3::new(1.0, 128.0 / 255.0, 0.0));
        assert_eq!(scene.settings.ssao_samples, Some(16));
    }

    #[test]
    fn build_graph_links_parents_and_shares_meshes() {
        let scene = SceneDescription::from_xml(SAMPLE).unwrap();
        let graph = scene.build_graph().unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.lights().len(), 1);
        assert_eq!(graph.meshes().len(), 2);
        let floor = graph.find("Floor").unwrap();
        let cube = graph.find("Cube").unwrap();
        assert_eq!(graph.node(cube).unwrap().parent(), Some(floor));
    }

    #[test]
    fn overrides_apply_to_settings() {
        let scene = SceneDescription::from_xml(SAMPLE).unwrap();
        let mut settings = PipelineSettings::default();
        scene.settings.apply(&mut settings);
        assert_eq!(settings.ssao.samples, 16);
        assert_eq!(settings.shadow.resolution, 512);
        assert_eq!(settings.msaa_samples, 4);
    }

    #[test]
    fn camera_object_places_camera() {
        let scene = SceneDescription::from_xml(SAMPLE).unwrap();
        let camera = scene.build_camera(&CameraSettings::default()).unwrap();
        assert_eq!(camera.fov(), 70.0);
        let expected = Vec3::new(0.0, -2.0, -5.0).normalize();
        assert!(camera.look_vector().distance(expected) < 1e-4);
    }

    #[test]
    fn missing_name_is_an_error() {
        let bad = "<scene><object><type>mesh</type></object></scene>";
        assert!(SceneDescription::from_xml(bad).is_err());
    }

    #[test]
    fn unknown_parent_is_an_error() {
        let bad = "<scene><object><name>A</name><parent>B</parent></object></scene>";
        let scene = SceneDescription::from_xml(bad).unwrap();
        assert!(scene.build_graph().is_err());
    }

    #[test]
    fn short_vectors_are_rejected() {
        let bad = "<scene><object><name>A</name><position>1 2</position></object></scene>";
        assert!(SceneDescription::from_xml(bad).is_err());
    }
}
