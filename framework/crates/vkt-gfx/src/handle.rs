use std::{fmt, ops::Deref, rc::Rc};

use ash::vk;

use crate::{
    error::{VktError, VktResult},
    interface::{DeviceInterface, InstanceInterface},
};

/// 已经检查过的 handle，只能通过 [`check`] 或 [`allow_null`] 得到
#[derive(Debug, Clone, Copy)]
pub struct Checked<T>(T);

impl<T: vk::Handle + Copy> Checked<T> {
    #[inline]
    pub fn get(&self) -> T {
        self.0
    }
}

/// 创建函数返回了 null handle 说明驱动没有按规范返回错误码，属于测试错误
pub fn check<T: vk::Handle + Copy>(handle: T) -> VktResult<Checked<T>> {
    if handle.as_raw() == 0 {
        Err(VktError::test_failed(format!("unexpected null {:?} handle", T::TYPE)))
    } else {
        Ok(Checked(handle))
    }
}

/// 合法的可选结果，允许 null
#[inline]
pub fn allow_null<T: vk::Handle + Copy>(handle: T) -> Checked<T> {
    Checked(handle)
}

/// 销毁策略，在构造时就绑定到 parent（instance / device / pool）
pub struct Deleter<T> {
    destroy: Option<Box<dyn FnOnce(T)>>,
}

// 构造
impl<T: 'static> Deleter<T> {
    pub fn new(destroy: impl FnOnce(T) + 'static) -> Self {
        Self {
            destroy: Some(Box::new(destroy)),
        }
    }

    /// 不做任何事情，用于不拥有的 handle
    pub fn noop() -> Self {
        Self { destroy: None }
    }

    /// device 的子对象：`vkDestroyXxx(device, handle)`
    pub fn device_child(device: Rc<dyn DeviceInterface>, destroy: fn(&dyn DeviceInterface, T)) -> Self {
        Self::new(move |handle| destroy(device.as_ref(), handle))
    }
}

impl Deleter<vk::Device> {
    /// device 自身：函数表里只剩下 `vkDestroyDevice`
    pub fn device(device: Rc<dyn DeviceInterface>) -> Self {
        Self::new(move |_| device.destroy_device())
    }
}

impl Deleter<vk::Instance> {
    pub fn instance(instance: Rc<dyn InstanceInterface>) -> Self {
        Self::new(move |_| instance.destroy_instance())
    }
}

impl<T> Deleter<T> {
    fn call(mut self, handle: T) {
        if let Some(destroy) = self.destroy.take() {
            destroy(handle);
        }
    }
}

/// 拥有一个 handle，drop 时调用 deleter 恰好一次
///
/// 所有权只能转移不能复制；重新赋值会先销毁旧的 handle。
pub struct Move<T: vk::Handle + Copy> {
    handle: T,
    deleter: Option<Deleter<T>>,
}

// 构造与销毁
impl<T: vk::Handle + Copy> Move<T> {
    pub fn new(handle: Checked<T>, deleter: Deleter<T>) -> Self {
        Self {
            handle: handle.0,
            deleter: Some(deleter),
        }
    }

    /// 空的 Move，不拥有任何东西
    pub fn null() -> Self {
        Self {
            handle: T::from_raw(0),
            deleter: None,
        }
    }

    /// 放弃所有权，返回裸 handle，之后不会再销毁
    pub fn disown(mut self) -> T {
        self.deleter = None;
        std::mem::replace(&mut self.handle, T::from_raw(0))
    }
}

// getters
impl<T: vk::Handle + Copy> Move<T> {
    #[inline]
    pub fn get(&self) -> T {
        self.handle
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.handle.as_raw() == 0
    }
}

impl<T: vk::Handle + Copy> Default for Move<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: vk::Handle + Copy> Deref for Move<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<T: vk::Handle + Copy + fmt::Debug> fmt::Debug for Move<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Move").field(&self.handle).finish()
    }
}

impl<T: vk::Handle + Copy> Drop for Move<T> {
    fn drop(&mut self) {
        if let Some(deleter) = self.deleter.take() {
            if self.handle.as_raw() != 0 {
                deleter.call(self.handle);
            }
        }
    }
}

/// 不可重新绑定的 [`Move`]，用于在整个生命周期内只持有同一个 handle 的成员
pub struct Unique<T: vk::Handle + Copy>(Move<T>);

impl<T: vk::Handle + Copy> Unique<T> {
    #[inline]
    pub fn get(&self) -> T {
        self.0.get()
    }
}

impl<T: vk::Handle + Copy> From<Move<T>> for Unique<T> {
    fn from(value: Move<T>) -> Self {
        Self(value)
    }
}

impl<T: vk::Handle + Copy> Deref for Unique<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0.handle
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    /// 记录每一次 deleter 调用
    fn counting_deleter(log: &Rc<RefCell<Vec<u64>>>) -> Deleter<vk::Buffer> {
        let log = log.clone();
        Deleter::new(move |handle: vk::Buffer| {
            use ash::vk::Handle;
            log.borrow_mut().push(handle.as_raw())
        })
    }

    fn buffer(raw: u64) -> vk::Buffer {
        use ash::vk::Handle;
        vk::Buffer::from_raw(raw)
    }

    #[test]
    fn test_check_rejects_null() {
        assert!(matches!(check(vk::Buffer::null()), Err(VktError::TestFailed(_))));
        assert_eq!(check(buffer(3)).unwrap().get(), buffer(3));
        assert_eq!(allow_null(vk::Buffer::null()).get(), vk::Buffer::null());
    }

    #[test]
    fn test_drop_destroys_once() {
        let log = Rc::new(RefCell::new(vec![]));
        {
            let _m = Move::new(check(buffer(1)).unwrap(), counting_deleter(&log));
        }
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn test_move_chain_destroys_once() {
        let log = Rc::new(RefCell::new(vec![]));
        let a = Move::new(check(buffer(5)).unwrap(), counting_deleter(&log));
        let b = a;
        let c = b;
        let unique: Unique<vk::Buffer> = c.into();
        assert_eq!(unique.get(), buffer(5));
        assert!(log.borrow().is_empty());
        drop(unique);
        assert_eq!(*log.borrow(), vec![5]);
    }

    #[test]
    fn test_reassignment_destroys_previous() {
        let log = Rc::new(RefCell::new(vec![]));
        let mut m = Move::new(check(buffer(1)).unwrap(), counting_deleter(&log));
        m = Move::new(check(buffer(2)).unwrap(), counting_deleter(&log));
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(*m, buffer(2));
        drop(m);
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_disown_skips_deleter() {
        let log = Rc::new(RefCell::new(vec![]));
        let m = Move::new(check(buffer(9)).unwrap(), counting_deleter(&log));
        assert_eq!(m.disown(), buffer(9));
        assert!(log.borrow().is_empty());

        // null 的 Move 不会调用 deleter
        let null = Move::new(allow_null(vk::Buffer::null()), counting_deleter(&log));
        assert!(null.is_null());
        drop(null);
        assert!(log.borrow().is_empty());
    }
}
