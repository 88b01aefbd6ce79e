//! 应用参数文件
//!
//! 每行一条记录：`instance|device, vendorID, deviceID, key, value`，`#` 开始的内容是注释。
//! 数字可以是十进制或者 `0x` 开头的十六进制。

use std::{fs, path::Path};

use itertools::Itertools;
use vkt_gfx::error::{VktError, VktResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamScope {
    Instance,
    Device,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApplicationParameter {
    pub scope: ParamScope,
    pub vendor_id: u32,
    pub device_id: u32,
    pub key: u32,
    pub value: u64,
}

impl ApplicationParameter {
    /// instance 参数对所有设备有效；device 参数只对匹配的设备有效
    pub fn applies_to(&self, vendor_id: u32, device_id: u32) -> bool {
        match self.scope {
            ParamScope::Instance => true,
            ParamScope::Device => self.vendor_id == vendor_id && self.device_id == device_id,
        }
    }
}

fn parse_number(field: &str) -> Option<u64> {
    match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

fn parse_u32(field: &str) -> Option<u32> {
    parse_number(field).and_then(|v| u32::try_from(v).ok())
}

pub fn parse_application_parameters(content: &str) -> VktResult<Vec<ApplicationParameter>> {
    let mut params = vec![];
    for (line_no, line) in content.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let malformed = || VktError::internal(format!("malformed application parameter at line {}: {line}", line_no + 1));

        let fields = line.split(',').map(str::trim).collect_vec();
        let [scope, vendor_id, device_id, key, value] = fields.as_slice() else {
            return Err(malformed());
        };
        let scope = match *scope {
            "instance" => ParamScope::Instance,
            "device" => ParamScope::Device,
            _ => return Err(malformed()),
        };

        params.push(ApplicationParameter {
            scope,
            vendor_id: parse_u32(vendor_id).ok_or_else(malformed)?,
            device_id: parse_u32(device_id).ok_or_else(malformed)?,
            key: parse_u32(key).ok_or_else(malformed)?,
            value: parse_number(value).ok_or_else(malformed)?,
        });
    }
    Ok(params)
}

/// 文件不可读是资源错误；内容错误是框架错误
pub fn read_application_parameters(path: &Path) -> VktResult<Vec<ApplicationParameter>> {
    let content = fs::read_to_string(path)
        .map_err(|e| VktError::Resource(format!("failed to read application parameters {path:?}: {e}")))?;
    parse_application_parameters(&content)
}

/// 某个作用域下对设备有效的参数
pub fn filter_application_parameters(
    params: &[ApplicationParameter],
    scope: ParamScope,
    vendor_id: u32,
    device_id: u32,
) -> Vec<ApplicationParameter> {
    params.iter().filter(|p| p.scope == scope && p.applies_to(vendor_id, device_id)).copied().collect_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let params = parse_application_parameters(
            "# scope, vendor, device, key, value\n\
             instance, 0x1234, 0x5678, 1, 42\n\
             \n\
             device, 4660, 22136, 0x10, 0xff # trailing comment\n",
        )
        .unwrap();

        assert_eq!(params.len(), 2);
        assert_eq!(
            params[0],
            ApplicationParameter {
                scope: ParamScope::Instance,
                vendor_id: 0x1234,
                device_id: 0x5678,
                key: 1,
                value: 42
            }
        );
        assert_eq!(params[1].scope, ParamScope::Device);
        assert_eq!(params[1].vendor_id, 0x1234);
        assert_eq!(params[1].key, 0x10);
        assert_eq!(params[1].value, 0xff);
    }

    #[test]
    fn test_malformed_rows() {
        assert!(matches!(parse_application_parameters("device, 1, 2, 3"), Err(VktError::Internal(_))));
        assert!(matches!(parse_application_parameters("queue, 1, 2, 3, 4"), Err(VktError::Internal(_))));
        assert!(matches!(parse_application_parameters("device, 1, 2, x, 4"), Err(VktError::Internal(_))));
        assert!(matches!(parse_application_parameters("device, 0x1ffffffff, 2, 3, 4"), Err(VktError::Internal(_))));
    }

    #[test]
    fn test_filter_by_device() {
        let params = parse_application_parameters(
            "instance, 0, 0, 1, 1\n\
             device, 0x1234, 0x5678, 2, 2\n\
             device, 0x1234, 0x9999, 3, 3\n",
        )
        .unwrap();

        let device = filter_application_parameters(&params, ParamScope::Device, 0x1234, 0x5678);
        assert_eq!(device.iter().map(|p| p.key).collect_vec(), vec![2]);

        let instance = filter_application_parameters(&params, ParamScope::Instance, 0x1234, 0x5678);
        assert_eq!(instance.iter().map(|p| p.key).collect_vec(), vec![1]);
    }

    #[test]
    fn test_missing_file_is_resource_error() {
        let err = read_application_parameters(Path::new("/nonexistent/app-params.csv")).unwrap_err();
        assert!(err.is_resource_error());
    }
}
