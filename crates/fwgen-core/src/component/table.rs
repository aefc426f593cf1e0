//! Table row instantiation.

use super::{Kind, NodeId, Tree};
use crate::error::{Error, Result};
use crate::schema::SchemaNode;

impl Tree {
    /// Creates `count` rows of table `id` from its template.
    ///
    /// Rows are named by their index. A single-element template makes each
    /// row that element; otherwise each row is a group holding one copy of
    /// every template element. Does nothing if rows already exist.
    pub(crate) fn instantiate_rows(&mut self, id: NodeId, count: usize) -> Result<()> {
        let template = match &self.get(id).kind {
            Kind::Table(spec) if spec.instantiated => return Ok(()),
            Kind::Table(spec) => spec.template.clone(),
            _ => return Err(Error::layout(format!("{} is not a table", self.path_of(id)))),
        };

        for index in 0..count {
            let name = index.to_string();
            if let [single] = template.as_slice() {
                self.construct(single, Some(id), Some(name), Some(index))?;
            } else {
                let mut group = SchemaNode::new("group");
                group.set_attr("name", name);
                group.children = template.clone();
                self.construct(&group, Some(id), None, Some(index))?;
            }
        }

        if let Kind::Table(spec) = &mut self.get_mut(id).kind {
            spec.instantiated = true;
        }
        log::trace!("{}: {count} rows", self.path_of(id));
        Ok(())
    }

    /// Rows of table `id` in current order.
    pub(crate) fn rows(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id)
            .children
            .iter()
            .copied()
            .filter(|c| self.get(*c).row.is_some())
            .collect()
    }
}
