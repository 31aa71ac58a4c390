//! The storage capability shared by every backend.

use serde::{Deserialize, Serialize};

use crate::element::{ElementKind, ElementValue, ElementValues};
use crate::error::Result;
use crate::selection::Selection;

/// Attribute map attached to the store or to a variable.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// A dimension and its current size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionInfo {
    pub name: String,
    /// Element kind of the dimension's coordinate values.
    pub kind: ElementKind,
    pub size: u64,
    /// `None` means unlimited.
    #[serde(default)]
    pub max_size: Option<u64>,
}

/// Schema and current shape of a variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub name: String,
    pub kind: ElementKind,
    pub dims: Vec<String>,
    pub shape: Vec<u64>,
    pub fill_value: ElementValue,
    pub is_dimension_scale: bool,
}

impl VariableInfo {
    /// Whether the first dimension of this variable is `dim`.
    pub fn is_indexed_by(&self, dim: &str) -> bool {
        self.dims.first().map(String::as_str) == Some(dim)
    }

    /// Size of the first dimension (1 for scalars).
    pub fn dim0_size(&self) -> u64 {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Number of elements per index of the first dimension.
    pub fn row_len(&self) -> u64 {
        self.shape.iter().skip(1).product()
    }
}

/// Definition of a variable to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    pub kind: ElementKind,
    pub dims: Vec<String>,
    #[serde(default)]
    pub fill_value: Option<ElementValue>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl VariableSpec {
    pub fn new(name: impl Into<String>, kind: ElementKind, dims: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind,
            dims: dims.iter().map(|d| d.to_string()).collect(),
            fill_value: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_fill_value(mut self, fill: ElementValue) -> Self {
        self.fill_value = Some(fill);
        self
    }

    pub fn with_attribute(mut self, name: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    /// The configured fill value, or the kind's missing value.
    pub fn effective_fill(&self) -> ElementValue {
        self.fill_value
            .clone()
            .unwrap_or_else(|| self.kind.missing_value())
    }

    /// Same schema as an existing variable.
    pub fn like(info: &VariableInfo, attributes: Attributes) -> Self {
        Self {
            name: info.name.clone(),
            kind: info.kind,
            dims: info.dims.clone(),
            fill_value: Some(info.fill_value.clone()),
            attributes,
        }
    }
}

/// A typed, hierarchical, chunk-oriented container of variables.
///
/// Variable names are hierarchical paths such as `MetaData/latitude`.
/// Dimensions are themselves one-dimensional variables (dimension scales)
/// holding coordinate values.
///
/// `read` and `write` move data between a flat memory buffer and the
/// variable through a pair of selections; the memory selection is resolved
/// against its own extent and the storage selection against the variable's
/// current shape. Both must select the same number of elements.
pub trait ObsStore: Send {
    fn dimensions(&self) -> Vec<DimensionInfo>;

    fn dimension(&self, name: &str) -> Result<DimensionInfo>;

    /// Non-dimension variables, in name order.
    fn variables(&self) -> Vec<String>;

    /// Variable or dimension scale schema.
    fn variable(&self, name: &str) -> Result<VariableInfo>;

    fn exists(&self, name: &str) -> bool;

    fn create_dimension(
        &mut self,
        name: &str,
        kind: ElementKind,
        size: u64,
        max_size: Option<u64>,
    ) -> Result<()>;

    fn create_variable(&mut self, spec: VariableSpec) -> Result<()>;

    /// Read into a buffer of `memory.extent()` elements. Unselected buffer
    /// positions hold the variable's fill value.
    fn read(&self, name: &str, memory: &Selection, storage: &Selection) -> Result<ElementValues>;

    /// Write the memory-selected elements of `values` to the storage selection.
    fn write(
        &mut self,
        name: &str,
        values: &ElementValues,
        memory: &Selection,
        storage: &Selection,
    ) -> Result<()>;

    /// Change the size of a dimension and every variable that uses it.
    fn resize_dimension(&mut self, name: &str, size: u64) -> Result<()>;

    /// Global attributes when `var` is `None`.
    fn attributes(&self, var: Option<&str>) -> Result<Attributes>;

    fn set_attribute(
        &mut self,
        var: Option<&str>,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()>;

    /// Read an entire variable as a flat row-major column.
    fn read_all(&self, name: &str) -> Result<ElementValues> {
        let info = self.variable(name)?;
        let len = info.shape.iter().product::<u64>();
        self.read(name, &Selection::all(vec![len]), &Selection::all(info.shape))
    }

    /// Overwrite an entire variable from a flat row-major column.
    fn write_all(&mut self, name: &str, values: &ElementValues) -> Result<()> {
        let info = self.variable(name)?;
        self.write(
            name,
            values,
            &Selection::all(vec![values.len() as u64]),
            &Selection::all(info.shape),
        )
    }

    /// Read a single attribute.
    fn attribute(&self, var: Option<&str>, name: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.attributes(var)?.get(name).cloned())
    }
}
