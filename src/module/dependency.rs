//! 模块依赖管理
//!
//! 本模块提供模块依赖关系的图结构和解析器。
//!
//! # 主要组件
//!
//! - [`DependencyGraph`] - 依赖关系图，硬依赖边和软依赖边分开保存
//! - [`DependencyResolver`] - 依赖解析器，校验依赖存在性、检测循环并给出初始化顺序
//!
//! 软依赖不参与存在性校验和环检测，允许成环。排序时软依赖边只在不与
//! 硬依赖边（以及先前已采纳的软依赖边）冲突时生效，冲突的软依赖边被忽略。
//!
//! # 示例
//!
//! ```rust
//! use chips_loader::module::dependency::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_module("sidebar");
//! graph.add_module("tabs");
//! graph.add_dependency("sidebar", "tabs");
//!
//! assert_eq!(graph.get_dependencies("sidebar"), vec!["tabs".to_string()]);
//! assert!(!graph.has_cycle());
//! ```

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::module::metadata::ModuleDeclaration;
use crate::utils::{CoreError, Result};

/// 模块依赖关系图
///
/// 节点按加入顺序保存，遍历顺序因此是确定的：
/// 同一组模块多次构建得到的拓扑序完全一致。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 节点（按加入顺序）
    nodes: Vec<String>,
    /// 正向边：模块名 -> 该模块的硬依赖
    edges: HashMap<String, Vec<String>>,
    /// 反向边：模块名 -> 硬依赖该模块的模块
    reverse_edges: HashMap<String, Vec<String>>,
    /// 软依赖边（按加入顺序）：(模块名, 软依赖)
    soft_edges: Vec<(String, String)>,
}

impl DependencyGraph {
    /// 创建一个空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 从模块声明构建依赖图
    ///
    /// 软依赖只保留指向集合内模块的边。
    pub fn from_declarations<'a, I>(declarations: I) -> Self
    where
        I: IntoIterator<Item = &'a ModuleDeclaration>,
    {
        let mut graph = Self::new();
        let declarations: Vec<&ModuleDeclaration> = declarations.into_iter().collect();
        for decl in &declarations {
            graph.add_module(&decl.name);
        }
        for decl in &declarations {
            for dep in &decl.dependencies {
                graph.add_dependency(&decl.name, dep);
            }
        }
        for decl in &declarations {
            for dep in &decl.soft_dependencies {
                if graph.contains_module(dep) {
                    graph.add_soft_dependency(&decl.name, dep);
                }
            }
        }
        graph
    }

    /// 添加模块节点到图中
    ///
    /// 如果模块已存在，则不会重复添加。
    pub fn add_module(&mut self, module_id: &str) {
        if !self.edges.contains_key(module_id) {
            self.nodes.push(module_id.to_string());
            self.edges.insert(module_id.to_string(), Vec::new());
            self.reverse_edges.insert(module_id.to_string(), Vec::new());
        }
    }

    /// 添加依赖关系
    ///
    /// 表示 `module_id` 硬依赖于 `dependency_id`。模块不存在时自动添加。
    ///
    /// ```rust
    /// use chips_loader::module::dependency::DependencyGraph;
    ///
    /// let mut graph = DependencyGraph::new();
    /// graph.add_dependency("statusbar", "tabs");
    ///
    /// assert!(graph.get_dependencies("statusbar").contains(&"tabs".to_string()));
    /// assert!(graph.get_dependents("tabs").contains(&"statusbar".to_string()));
    /// ```
    pub fn add_dependency(&mut self, module_id: &str, dependency_id: &str) {
        self.add_module(module_id);
        self.add_module(dependency_id);

        let deps = self.edges.entry(module_id.to_string()).or_default();
        if !deps.iter().any(|d| d == dependency_id) {
            deps.push(dependency_id.to_string());
        }

        let rev_deps = self.reverse_edges.entry(dependency_id.to_string()).or_default();
        if !rev_deps.iter().any(|d| d == module_id) {
            rev_deps.push(module_id.to_string());
        }
    }

    /// 添加软依赖关系
    ///
    /// 软依赖边只影响排序，不参与环检测。两端模块在排序时都必须在图中，否则该边被忽略。
    pub fn add_soft_dependency(&mut self, module_id: &str, dependency_id: &str) {
        if module_id == dependency_id {
            return;
        }
        let edge = (module_id.to_string(), dependency_id.to_string());
        if !self.soft_edges.contains(&edge) {
            self.soft_edges.push(edge);
        }
    }

    /// 获取模块的直接依赖列表
    pub fn get_dependencies(&self, module_id: &str) -> Vec<String> {
        self.edges.get(module_id).cloned().unwrap_or_default()
    }

    /// 获取依赖该模块的模块列表
    pub fn get_dependents(&self, module_id: &str) -> Vec<String> {
        self.reverse_edges.get(module_id).cloned().unwrap_or_default()
    }

    /// 检测是否存在循环依赖
    ///
    /// ```rust
    /// use chips_loader::module::dependency::DependencyGraph;
    ///
    /// let mut graph = DependencyGraph::new();
    /// graph.add_dependency("a", "b");
    /// graph.add_dependency("b", "c");
    /// assert!(!graph.has_cycle());
    ///
    /// graph.add_dependency("c", "a");
    /// assert!(graph.has_cycle());
    /// ```
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// 查找循环依赖路径
    ///
    /// 返回的路径首尾是同一个模块，例如 `["a", "b", "c", "a"]`。
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();
        let mut path = Vec::new();

        for node in &self.nodes {
            if let Some(cycle) = self.find_cycle_util(node, &mut visited, &mut visiting, &mut path)
            {
                return Some(cycle);
            }
        }

        None
    }

    /// 查找循环的辅助函数（DFS）
    fn find_cycle_util(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if visiting.contains(node) {
            // 回边：从路径中截出环
            let start = path.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }

        if visited.contains(node) {
            return None;
        }

        visiting.insert(node.to_string());
        path.push(node.to_string());

        if let Some(neighbors) = self.edges.get(node) {
            for neighbor in neighbors {
                if let Some(cycle) = self.find_cycle_util(neighbor, visited, visiting, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        visiting.remove(node);
        visited.insert(node.to_string());
        None
    }

    /// 拓扑排序（DFS 后序输出）
    ///
    /// 硬依赖总是排在依赖方之前。软依赖边按加入顺序逐条采纳，
    /// 与已有约束成环的软依赖边被跳过。互不相关的模块保持加入顺序。
    ///
    /// # 错误
    ///
    /// 存在循环依赖时返回 `CoreError::CircularDependency`，携带 `a -> b -> a` 形式的路径。
    ///
    /// ```rust
    /// use chips_loader::module::dependency::DependencyGraph;
    ///
    /// let mut graph = DependencyGraph::new();
    /// graph.add_module("c");
    /// graph.add_module("b");
    /// graph.add_module("a");
    /// graph.add_dependency("b", "a");
    /// assert_eq!(graph.topological_sort().unwrap(), vec!["c", "a", "b"]);
    ///
    /// graph.add_soft_dependency("c", "b");
    /// assert_eq!(graph.topological_sort().unwrap(), vec!["a", "b", "c"]);
    /// ```
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(CoreError::CircularDependency(cycle.join(" -> ")));
        }

        let edges = self.ordering_edges();
        let mut visited = HashSet::new();
        let mut result = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            Self::post_order(&edges, node, &mut visited, &mut result);
        }
        Ok(result)
    }

    /// 排序用的边：全部硬依赖边加上不成环的软依赖边
    fn ordering_edges(&self) -> HashMap<String, Vec<String>> {
        let mut edges = self.edges.clone();
        for (module, dep) in &self.soft_edges {
            if !self.contains_module(module) || !self.contains_module(dep) {
                continue;
            }
            if edges.get(module).map_or(false, |deps| deps.contains(dep)) {
                continue;
            }
            if Self::reaches(&edges, dep, module) {
                debug!(module_id = %module, soft_dependency = %dep, "软依赖与已有顺序冲突，忽略");
                continue;
            }
            edges.entry(module.clone()).or_default().push(dep.clone());
        }
        edges
    }

    /// `from` 是否沿依赖边可达 `to`
    fn reaches(edges: &HashMap<String, Vec<String>>, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(deps) = edges.get(node) {
                stack.extend(deps.iter().map(String::as_str));
            }
        }
        false
    }

    fn post_order(
        edges: &HashMap<String, Vec<String>>,
        node: &str,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(node.to_string()) {
            return;
        }
        if let Some(deps) = edges.get(node) {
            for dep in deps {
                Self::post_order(edges, dep, visited, result);
            }
        }
        result.push(node.to_string());
    }

    /// 检查图是否为空
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 获取图中模块数量
    pub fn module_count(&self) -> usize {
        self.nodes.len()
    }

    /// 检查是否包含指定模块
    pub fn contains_module(&self, module_id: &str) -> bool {
        self.edges.contains_key(module_id)
    }
}

/// 依赖解析器
///
/// 对一组已发现的模块做三件事：校验硬依赖都存在、检测硬依赖环、输出初始化顺序。
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// 创建新的依赖解析器
    pub fn new() -> Self {
        Self
    }

    /// 解析模块集合，返回按初始化顺序排列的引用
    ///
    /// # 错误
    ///
    /// - `CoreError::MissingDependency` - 某个硬依赖不在输入集合中
    /// - `CoreError::CircularDependency` - 硬依赖成环（包括自依赖）
    pub fn resolve<'a, T>(&self, modules: &'a [T]) -> Result<Vec<&'a T>>
    where
        T: AsRef<ModuleDeclaration>,
    {
        let by_name: HashMap<&str, &'a T> = modules
            .iter()
            .map(|m| (m.as_ref().name.as_str(), m))
            .collect();

        self.check_missing(modules, &by_name)?;

        let graph = DependencyGraph::from_declarations(modules.iter().map(AsRef::as_ref));
        let order = graph.topological_sort()?;

        Ok(order
            .iter()
            .filter_map(|name| by_name.get(name.as_str()).copied())
            .collect())
    }

    /// 只返回模块名的解析结果
    pub fn resolve_names<T>(&self, modules: &[T]) -> Result<Vec<String>>
    where
        T: AsRef<ModuleDeclaration>,
    {
        Ok(self
            .resolve(modules)?
            .into_iter()
            .map(|m| m.as_ref().name.clone())
            .collect())
    }

    fn check_missing<T>(&self, modules: &[T], by_name: &HashMap<&str, &T>) -> Result<()>
    where
        T: AsRef<ModuleDeclaration>,
    {
        for module in modules {
            let decl = module.as_ref();
            if let Some(dep) = decl
                .dependencies
                .iter()
                .find(|dep| !by_name.contains_key(dep.as_str()))
            {
                return Err(CoreError::MissingDependency {
                    module: decl.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(())
    }
}
