//! CLI 通用输出格式化模块
//!
//! 提供 table/json/yaml 三种输出格式的通用实现

use anyhow::Result;
use serde::Serialize;

/// 可输出为表格行的数据 trait
pub trait TableRow {
    /// 返回表格列标题
    fn headers() -> Vec<&'static str>;

    /// 返回该项的表格行数据
    fn row(&self) -> Vec<String>;

    /// 列宽，默认每列 20
    fn widths() -> Vec<usize> {
        Self::headers().iter().map(|_| 20).collect()
    }
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths.iter().chain(std::iter::repeat(&20)))
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end()
        .to_string()
}

/// 表格格式输出
pub fn print_table<T: TableRow>(items: &[T]) {
    let widths = T::widths();
    let headers: Vec<String> = T::headers().iter().map(|h| h.to_string()).collect();

    // 打印表头
    let header_line = format_line(&headers, &widths);
    println!("{}", header_line);
    println!("{}", "-".repeat(widths.iter().sum::<usize>() + widths.len().saturating_sub(1)));

    // 打印数据行
    for item in items {
        println!("{}", format_line(&item.row(), &widths));
    }
}

/// JSON 格式输出
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// YAML 格式输出
pub fn print_yaml<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    print!("{}", serde_yaml::to_string(value)?);
    Ok(())
}

/// 根据格式参数选择输出方式
pub fn output_formatted<T: TableRow + Serialize>(items: &[T], format: &str) -> Result<()> {
    match format {
        "json" => print_json(items)?,
        "yaml" => print_yaml(items)?,
        "table" => print_table(items),
        other => anyhow::bail!("不支持的输出格式: {}，可选 table/json/yaml", other),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_pads_columns() {
        let cells = vec!["a".to_string(), "bb".to_string()];
        assert_eq!(format_line(&cells, &[3, 4]), "a   bb");
    }

    #[test]
    fn test_format_line_default_width() {
        let cells = vec!["a".to_string(), "b".to_string()];
        assert_eq!(format_line(&cells, &[2]), "a  b");
    }
}
