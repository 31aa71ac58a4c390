//! In-memory observation store.

use std::collections::BTreeMap;

use tracing::trace;

use crate::element::{ElementKind, ElementValue, ElementValues};
use crate::error::{Result, StoreError};
use crate::selection::{check_transfer, ResolvedSelection, Selection};
use crate::store::{Attributes, DimensionInfo, ObsStore, VariableInfo, VariableSpec};

#[derive(Debug, Clone)]
struct Node {
    kind: ElementKind,
    dims: Vec<String>,
    fill: ElementValue,
    data: ElementValues,
    attrs: Attributes,
    is_dimension_scale: bool,
}

/// A hierarchical container held entirely in memory.
///
/// Used for frame buffers and for a rank's local working set. Resizing a
/// dimension re-lays out every variable that uses it, keeping overlapping
/// elements and padding with the fill value.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    dims: BTreeMap<String, DimensionInfo>,
    nodes: BTreeMap<String, Node>,
    attrs: Attributes,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, name: &str) -> Result<&Node> {
        self.nodes.get(name).ok_or_else(|| StoreError::not_found(name))
    }

    fn shape_of(&self, node: &Node) -> Result<Vec<u64>> {
        node.dims
            .iter()
            .map(|d| {
                self.dims
                    .get(d)
                    .map(|dim| dim.size)
                    .ok_or_else(|| StoreError::not_found(d.as_str()))
            })
            .collect()
    }
}

/// Copy the overlapping block of `old_shape` and `new_shape` into a new buffer.
fn relayout(
    name: &str,
    data: &ElementValues,
    fill: &ElementValue,
    old_shape: &[u64],
    new_shape: &[u64],
) -> Result<ElementValues> {
    let new_len = new_shape.iter().product::<u64>() as usize;
    let mut out = ElementValues::filled(fill, new_len);
    let common: Vec<u64> = old_shape
        .iter()
        .zip(new_shape)
        .map(|(a, b)| (*a).min(*b))
        .collect();
    let block = ResolvedSelection::full(&common);
    if block.count() > 0 {
        let src = block.offsets(name, old_shape)?;
        let dst = block.offsets(name, new_shape)?;
        out.scatter(&dst, &data.gather(&src))?;
    }
    Ok(out)
}

impl ObsStore for MemoryStore {
    fn dimensions(&self) -> Vec<DimensionInfo> {
        self.dims.values().cloned().collect()
    }

    fn dimension(&self, name: &str) -> Result<DimensionInfo> {
        self.dims
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(name))
    }

    fn variables(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, n)| !n.is_dimension_scale)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn variable(&self, name: &str) -> Result<VariableInfo> {
        let node = self.node(name)?;
        Ok(VariableInfo {
            name: name.to_string(),
            kind: node.kind,
            dims: node.dims.clone(),
            shape: self.shape_of(node)?,
            fill_value: node.fill.clone(),
            is_dimension_scale: node.is_dimension_scale,
        })
    }

    fn exists(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    fn create_dimension(
        &mut self,
        name: &str,
        kind: ElementKind,
        size: u64,
        max_size: Option<u64>,
    ) -> Result<()> {
        if self.exists(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        if let Some(max) = max_size {
            if size > max {
                return Err(StoreError::invalid(format!(
                    "dimension '{}' size {} exceeds maximum {}",
                    name, size, max
                )));
            }
        }
        let fill = kind.missing_value();
        self.dims.insert(
            name.to_string(),
            DimensionInfo {
                name: name.to_string(),
                kind,
                size,
                max_size,
            },
        );
        self.nodes.insert(
            name.to_string(),
            Node {
                kind,
                dims: vec![name.to_string()],
                data: ElementValues::filled(&fill, size as usize),
                fill,
                attrs: Attributes::new(),
                is_dimension_scale: true,
            },
        );
        Ok(())
    }

    fn create_variable(&mut self, spec: VariableSpec) -> Result<()> {
        if self.exists(&spec.name) {
            return Err(StoreError::AlreadyExists(spec.name));
        }
        let fill = spec.effective_fill();
        if fill.kind() != spec.kind {
            return Err(StoreError::KindMismatch {
                name: spec.name,
                expected: spec.kind,
                actual: fill.kind(),
            });
        }
        let mut len = 1u64;
        for d in &spec.dims {
            len *= self.dimension(d)?.size;
        }
        self.nodes.insert(
            spec.name.clone(),
            Node {
                kind: spec.kind,
                dims: spec.dims,
                data: ElementValues::filled(&fill, len as usize),
                fill,
                attrs: spec.attributes,
                is_dimension_scale: false,
            },
        );
        Ok(())
    }

    fn read(&self, name: &str, memory: &Selection, storage: &Selection) -> Result<ElementValues> {
        let node = self.node(name)?;
        let shape = self.shape_of(node)?;
        let mem = memory.resolve()?;
        let sto = storage.resolve()?;
        check_transfer(name, &mem, &sto)?;

        let src = sto.offsets(name, &shape)?;
        let dst = mem.offsets(name, memory.extent())?;
        let mut out = ElementValues::filled(&node.fill, memory.extent_len());
        out.scatter(&dst, &node.data.gather(&src))?;
        trace!(variable = name, count = src.len(), "memory store read");
        Ok(out)
    }

    fn write(
        &mut self,
        name: &str,
        values: &ElementValues,
        memory: &Selection,
        storage: &Selection,
    ) -> Result<()> {
        let node = self.node(name)?;
        if values.kind() != node.kind {
            return Err(StoreError::KindMismatch {
                name: name.to_string(),
                expected: node.kind,
                actual: values.kind(),
            });
        }
        if values.len() != memory.extent_len() {
            return Err(StoreError::write_failed(
                name,
                format!(
                    "buffer holds {} elements, memory extent {:?}",
                    values.len(),
                    memory.extent()
                ),
            ));
        }
        let shape = self.shape_of(node)?;
        let mem = memory.resolve()?;
        let sto = storage.resolve()?;
        check_transfer(name, &mem, &sto)?;

        let src = mem.offsets(name, memory.extent())?;
        let dst = sto.offsets(name, &shape)?;
        let picked = values.gather(&src);
        if let Some(node) = self.nodes.get_mut(name) {
            node.data.scatter(&dst, &picked)?;
        }
        trace!(variable = name, count = dst.len(), "memory store write");
        Ok(())
    }

    fn resize_dimension(&mut self, name: &str, size: u64) -> Result<()> {
        let dim = self.dimension(name)?;
        if let Some(max) = dim.max_size {
            if size > max {
                return Err(StoreError::invalid(format!(
                    "dimension '{}' size {} exceeds maximum {}",
                    name, size, max
                )));
            }
        }
        if dim.size == size {
            return Ok(());
        }

        let affected: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.dims.iter().any(|d| d == name))
            .map(|(k, _)| k.clone())
            .collect();

        let mut relaid = Vec::with_capacity(affected.len());
        for var in &affected {
            let node = self.node(var)?;
            let old_shape = self.shape_of(node)?;
            let new_shape: Vec<u64> = node
                .dims
                .iter()
                .zip(&old_shape)
                .map(|(d, &n)| if d == name { size } else { n })
                .collect();
            relaid.push(relayout(var, &node.data, &node.fill, &old_shape, &new_shape)?);
        }

        for (var, data) in affected.iter().zip(relaid) {
            if let Some(node) = self.nodes.get_mut(var) {
                node.data = data;
            }
        }
        if let Some(dim) = self.dims.get_mut(name) {
            dim.size = size;
        }
        Ok(())
    }

    fn attributes(&self, var: Option<&str>) -> Result<Attributes> {
        match var {
            None => Ok(self.attrs.clone()),
            Some(name) => Ok(self.node(name)?.attrs.clone()),
        }
    }

    fn set_attribute(
        &mut self,
        var: Option<&str>,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let attrs = match var {
            None => &mut self.attrs,
            Some(v) => {
                &mut self
                    .nodes
                    .get_mut(v)
                    .ok_or_else(|| StoreError::not_found(v))?
                    .attrs
            }
        };
        attrs.insert(name.to_string(), value);
        Ok(())
    }
}
