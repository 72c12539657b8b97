//! Text tree rendering

/// A node with one or more lines of text and nested children
#[derive(Debug, Clone, Default)]
pub struct TreeNode {
    pub lines: Vec<String>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            children: Vec::new(),
        }
    }

    /// Render with box-drawing branches, one node per branch
    pub fn render(&self) -> String {
        self.render_with_prefix("")
    }

    fn render_with_prefix(&self, prefix: &str) -> String {
        let mut out = self.lines.join(format!("\n{}", prefix).as_str());

        for (index, child) in self.children.iter().enumerate() {
            let last = index + 1 == self.children.len();
            let (branch, continuation) = if last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };

            out.push('\n');
            out.push_str(prefix);
            out.push_str(branch);
            out.push_str(&child.render_with_prefix(&format!("{}{}", prefix, continuation)));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_node() {
        let node = TreeNode::new(lines(&["."]));
        assert_eq!(node.render(), ".");
    }

    #[test]
    fn test_multiline_children() {
        let mut root = TreeNode::new(lines(&["."]));
        root.children.push(TreeNode::new(lines(&["Rotary valve", "Address: /dev/ttyACM0"])));
        root.children.push(TreeNode::new(lines(&["Rotary valve", "Address: /dev/ttyACM1"])));

        assert_eq!(
            root.render(),
            [
                ".",
                "├── Rotary valve",
                "│   Address: /dev/ttyACM0",
                "└── Rotary valve",
                "    Address: /dev/ttyACM1",
            ]
            .join("\n")
        );
    }

    #[test]
    fn test_nested_prefixes() {
        let mut inner = TreeNode::new(lines(&["b"]));
        inner.children.push(TreeNode::new(lines(&["c"])));
        let mut first = TreeNode::new(lines(&["a"]));
        first.children.push(inner);
        let mut root = TreeNode::new(lines(&["."]));
        root.children.push(first);
        root.children.push(TreeNode::new(lines(&["d"])));

        assert_eq!(
            root.render(),
            [".", "├── a", "│   └── b", "│       └── c", "└── d"].join("\n")
        );
    }
}
