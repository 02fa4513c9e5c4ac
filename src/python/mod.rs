use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::HelmConfig;
use crate::link::{LinkOpener, SerialOpener, SimulatedOpener};
use crate::supervisor::{CommandParams, CommandSupervisor, ControlLoop};

#[pyclass]
pub struct HelmSystem{
    inner: Arc<CommandSupervisor>,
    control: Mutex<Option<ControlLoop>>,
}

#[pymethods]
impl HelmSystem{
    #[new]
    #[pyo3(signature = (config_path=None, simulate=false))]
    fn new(config_path: Option<&str>, simulate: bool) -> PyResult<Self>{
        let config = match config_path{
            Some(path) => HelmConfig::load(path).map_err(|e| PyValueError::new_err(e.to_string()))?,
            None => HelmConfig::default(),
        };
        let opener: Arc<dyn LinkOpener> = if simulate{
            Arc::new(SimulatedOpener::new())
        }else{
            Arc::new(SerialOpener::default())
        };
        let supervisor = CommandSupervisor::new(config, opener)
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        Ok(HelmSystem{
            inner: Arc::new(supervisor),
            control: Mutex::new(None),
        })
    }

    /// Runs a command; `params_json` is the console's request body.
    #[pyo3(signature = (code, params_json=None))]
    fn decision(&self, py: Python<'_>, code: i32, params_json: Option<&str>) -> PyResult<String>{
        let params = match params_json{
            Some(json) => serde_json::from_str::<CommandParams>(json)
                .map_err(|e| PyValueError::new_err(e.to_string()))?,
            None => CommandParams::default(),
        };
        let inner = Arc::clone(&self.inner);
        Ok(py.allow_threads(move || inner.decision(code, params)))
    }

    fn status_json(&self) -> PyResult<String>{
        serde_json::to_string(&self.inner.status()).map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }

    fn adjust_gear(&self, engine_id: i32, volts: f64) -> PyResult<()>{
        self.inner.adjust_gear(engine_id, volts).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    fn adjust_rudder(&self, engine_id: i32, angle: f64) -> PyResult<()>{
        self.inner.adjust_rudder(engine_id, angle).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    fn write_failures(&self) -> u64{
        self.inner.write_failures()
    }

    fn start_loop(&self) -> PyResult<()>{
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if control.is_none(){
            let started = ControlLoop::start(Arc::clone(&self.inner))
                .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
            *control = Some(started);
        }
        Ok(())
    }

    fn stop_loop(&self){
        let taken = self.control.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut control) = taken{
            control.stop();
        }
    }
}

#[pymodule]
fn helm_control(_py: Python, m: &PyModule) -> PyResult<()>{
    m.add_class::<HelmSystem>()?;
    Ok(())
}
