//! Label resolution.

use std::collections::HashMap;

use crate::error::ModuleError;
use crate::module::Function;
use crate::opcode::Op;

/// Map from label name to instruction index within one function.
///
/// Built by a single pre-pass over the body; shared by the interpreter and
/// the peephole so both agree on jump targets. A jump to a label missing
/// from the map is a hard compile error, detected here rather than at code
/// generation.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    map: HashMap<String, usize>,
}

impl LabelMap {
    /// Scan `func` for `Label` pseudo-instructions.
    pub fn build(func: &Function) -> Result<Self, ModuleError> {
        let mut map = HashMap::new();
        for (index, ins) in func.body.iter().enumerate() {
            if ins.op == Op::Label {
                let name = ins.label.clone().unwrap_or_default();
                if map.insert(name.clone(), index).is_some() {
                    return Err(ModuleError::DuplicateLabel {
                        function: func.name.clone(),
                        label: name,
                    });
                }
            }
        }
        Ok(LabelMap { map })
    }

    /// Instruction index of `label`, if defined.
    pub fn resolve(&self, label: &str) -> Option<usize> {
        self.map.get(label).copied()
    }

    /// Resolve or fail with the hard error.
    pub fn resolve_or_err(&self, func: &str, label: &str) -> Result<usize, ModuleError> {
        self.resolve(label).ok_or_else(|| ModuleError::UndefinedLabel {
            function: func.to_string(),
            label: label.to_string(),
        })
    }

    /// Number of labels defined.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no labels are defined.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::types::Type;

    #[test]
    fn resolves_indices() {
        let mut f = Function::new("f", vec![], Type::Void);
        f.push(Instruction::jump("end"));
        f.push(Instruction::label("end"));
        let labels = LabelMap::build(&f).unwrap();
        assert_eq!(labels.resolve("end"), Some(1));
        assert_eq!(labels.resolve("start"), None);
    }

    #[test]
    fn duplicate_labels_rejected() {
        let mut f = Function::new("f", vec![], Type::Void);
        f.push(Instruction::label("l"));
        f.push(Instruction::label("l"));
        assert!(matches!(
            LabelMap::build(&f),
            Err(ModuleError::DuplicateLabel { .. })
        ));
    }
}
