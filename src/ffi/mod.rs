use std::ffi::{c_char, CStr};
use std::ptr;
use std::sync::Arc;

use crate::config::HelmConfig;
use crate::link::{LinkOpener, SerialOpener, SimulatedOpener};
use crate::supervisor::{CommandParams, CommandSupervisor, ControlLoop};

pub const HELM_OK: i32 = 0;
pub const HELM_ERR_NULL: i32 = -1;
pub const HELM_ERR_ARGUMENT: i32 = -2;
pub const HELM_ERR_ENGINE: i32 = -3;
pub const HELM_ERR_SPAWN: i32 = -4;

/// Opaque handle owning the whole control stack.
pub struct HelmSystem{
    supervisor: Arc<CommandSupervisor>,
    control: Option<ControlLoop>,
}

unsafe fn opt_str<'a>(s: *const c_char) -> Result<Option<&'a str>, ()>{
    if s.is_null(){
        return Ok(None);
    }
    unsafe{ CStr::from_ptr(s).to_str().map(Some).map_err(|_| ()) }
}

/// Copies `msg` into `out` as a NUL-terminated string, truncating to fit.
/// Returns the number of bytes written, excluding the terminator.
unsafe fn write_message(msg: &str, out: *mut c_char, out_len: usize) -> i32{
    if out.is_null() || out_len == 0{
        return 0;
    }
    let n = msg.len().min(out_len - 1);
    unsafe{
        ptr::copy_nonoverlapping(msg.as_ptr(), out as *mut u8, n);
        *out.add(n) = 0;
    }
    n as i32
}

/// Builds the control stack. `config_path` may be null for defaults;
/// `simulate` swaps the serial ports for simulated boards.
#[no_mangle]
pub unsafe extern "C" fn helm_system_new(config_path: *const c_char, simulate: bool) -> *mut HelmSystem{
    let config = match unsafe{ opt_str(config_path) }{
        Ok(Some(path)) => match HelmConfig::load(path){
            Ok(config) => config,
            Err(e) =>{
                log::error!("loading {} failed: {}", path, e);
                return ptr::null_mut();
            }
        },
        Ok(None) => HelmConfig::default(),
        Err(()) => return ptr::null_mut(),
    };

    let opener: Arc<dyn LinkOpener> = if simulate{
        Arc::new(SimulatedOpener::new())
    }else{
        Arc::new(SerialOpener::default())
    };

    match CommandSupervisor::new(config, opener){
        Ok(supervisor) => Box::into_raw(Box::new(HelmSystem{
            supervisor: Arc::new(supervisor),
            control: None,
        })),
        Err(e) =>{
            log::error!("building control stack failed: {}", e);
            ptr::null_mut()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn helm_system_free(system: *mut HelmSystem){
    if !system.is_null(){
        unsafe{ drop(Box::from_raw(system)); }
    }
}

/// Runs command `code` with an optional JSON body and writes the status
/// line into `out`.
#[no_mangle]
pub unsafe extern "C" fn helm_system_decision(
    system: *mut HelmSystem,
    code: i32,
    params_json: *const c_char,
    out: *mut c_char,
    out_len: usize,
) -> i32{
    if system.is_null(){
        return HELM_ERR_NULL;
    }

    unsafe{
        let sys = &*system;
        let params = match opt_str(params_json){
            Ok(Some(json)) => match serde_json::from_str::<CommandParams>(json){
                Ok(params) => params,
                Err(e) =>{
                    log::warn!("bad command body: {}", e);
                    return HELM_ERR_ARGUMENT;
                }
            },
            Ok(None) => CommandParams::default(),
            Err(()) => return HELM_ERR_ARGUMENT,
        };

        let msg = sys.supervisor.decision(code, params);
        write_message(&msg, out, out_len)
    }
}

#[no_mangle]
pub unsafe extern "C" fn helm_system_adjust_gear(system: *mut HelmSystem, engine_id: i32, volts: f64) -> i32{
    if system.is_null(){
        return HELM_ERR_NULL;
    }
    unsafe{
        match (*system).supervisor.adjust_gear(engine_id, volts){
            Ok(()) => HELM_OK,
            Err(_) => HELM_ERR_ENGINE,
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn helm_system_adjust_rudder(system: *mut HelmSystem, engine_id: i32, angle: f64) -> i32{
    if system.is_null(){
        return HELM_ERR_NULL;
    }
    unsafe{
        match (*system).supervisor.adjust_rudder(engine_id, angle){
            Ok(()) => HELM_OK,
            Err(_) => HELM_ERR_ENGINE,
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn helm_system_write_failures(system: *mut HelmSystem) -> u64{
    if system.is_null(){
        return 0;
    }
    unsafe{ (*system).supervisor.write_failures() }
}

/// Starts the periodic control loop. Idempotent.
#[no_mangle]
pub unsafe extern "C" fn helm_system_start_loop(system: *mut HelmSystem) -> i32{
    if system.is_null(){
        return HELM_ERR_NULL;
    }
    unsafe{
        let sys = &mut *system;
        if sys.control.is_some(){
            return HELM_OK;
        }
        match ControlLoop::start(Arc::clone(&sys.supervisor)){
            Ok(control) =>{
                sys.control = Some(control);
                HELM_OK
            }
            Err(e) =>{
                log::error!("{}", e);
                HELM_ERR_SPAWN
            }
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn helm_system_stop_loop(system: *mut HelmSystem) -> i32{
    if system.is_null(){
        return HELM_ERR_NULL;
    }
    unsafe{
        if let Some(mut control) = (*system).control.take(){
            control.stop();
        }
    }
    HELM_OK
}

#[cfg(test)]
mod tests{
    use super::*;
    use std::ffi::CString;

    fn read(buf: &[c_char], n: i32) -> String{
        let bytes: Vec<u8> = buf[..n as usize].iter().map(|&c| c as u8).collect();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_ffi_create_free(){
        unsafe{
            let system = helm_system_new(ptr::null(), true);
            assert!(!system.is_null());
            helm_system_free(system);
            helm_system_free(ptr::null_mut());
        }
    }

    #[test]
    fn test_ffi_null_handles(){
        unsafe{
            assert_eq!(helm_system_decision(ptr::null_mut(), 0, ptr::null(), ptr::null_mut(), 0), HELM_ERR_NULL);
            assert_eq!(helm_system_adjust_gear(ptr::null_mut(), 0, 2.71), HELM_ERR_NULL);
            assert_eq!(helm_system_write_failures(ptr::null_mut()), 0);
        }
    }

    #[test]
    fn test_ffi_decision_writes_status(){
        unsafe{
            let system = helm_system_new(ptr::null(), true);
            let mut buf = [0 as c_char; 64];

            let n = helm_system_decision(system, 77, ptr::null(), buf.as_mut_ptr(), buf.len());
            assert_eq!(read(&buf, n), "invalid command 77");

            let body = CString::new(r#"{"Speed": "fast"}"#).unwrap();
            assert_eq!(helm_system_decision(system, 1, body.as_ptr(), buf.as_mut_ptr(), buf.len()), HELM_ERR_ARGUMENT);

            let mut tiny = [0 as c_char; 4];
            let n = helm_system_decision(system, 77, ptr::null(), tiny.as_mut_ptr(), tiny.len());
            assert_eq!(n, 3);
            assert_eq!(tiny[3], 0);

            helm_system_free(system);
        }
    }

    #[test]
    fn test_ffi_adjust(){
        unsafe{
            let system = helm_system_new(ptr::null(), true);
            assert_eq!(helm_system_adjust_gear(system, 1, 2.5), HELM_OK);
            assert_eq!(helm_system_adjust_gear(system, 5, 2.5), HELM_ERR_ENGINE);
            assert_eq!(helm_system_adjust_rudder(system, 0, 3.0), HELM_OK);
            assert_eq!(helm_system_adjust_rudder(system, -1, 3.0), HELM_ERR_ENGINE);
            assert_eq!((*system).supervisor.status().rudders[0].angle, 3.0);
            helm_system_free(system);
        }
    }

    #[test]
    fn test_ffi_loop_start_stop(){
        unsafe{
            let system = helm_system_new(ptr::null(), true);
            assert_eq!(helm_system_start_loop(system), HELM_OK);
            assert_eq!(helm_system_start_loop(system), HELM_OK);
            assert_eq!(helm_system_stop_loop(system), HELM_OK);
            helm_system_free(system);
        }
    }
}
